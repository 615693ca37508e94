use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::store::item::Item;
use crate::store::query::{QueryOutput, QueryRequest, ScanRequest};
use crate::store::schema::{GsiSpec, IndexState, TableSpec};
use crate::store::table::{Precondition, Table, TableDescription};

/// The table catalog and the entry point for every operation.
///
/// A `Database` owns its tables; item and query operations name the target
/// table and are routed to it. The catalog itself is a shared map behind a
/// read/write lock, so operations on different tables proceed
/// independently.
///
/// # Example
///
/// ```
/// use dynastore::{
///     AttributeType, Database, Item, KeyAttribute, KeySchema, TableSpec,
/// };
///
/// # async fn demo() -> dynastore::Result<()> {
/// let db = Database::new();
/// db.create_table(TableSpec::new(
///     "users",
///     KeySchema::new(KeyAttribute::new("user_id", AttributeType::String), None),
/// ))
/// .await?;
///
/// db.put_item("users", Item::new().set_string("user_id", "123")).await?;
/// let user = db
///     .get_item("users", Item::new().set_string("user_id", "123"))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Database {
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl Database {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    async fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    // --- Catalog operations ---

    /// Creates a table. Local secondary indexes must be part of the spec;
    /// they cannot be added later.
    pub async fn create_table(&self, spec: TableSpec) -> Result<()> {
        spec.validate()?;
        let mut tables = self.tables.write().await;
        if tables.contains_key(spec.name()) {
            return Err(Error::TableAlreadyExists(spec.name().to_string()));
        }
        let name = spec.name().to_string();
        tables.insert(name.clone(), Arc::new(Table::new(spec)));
        info!(table = %name, "table created");
        Ok(())
    }

    /// Deletes a table and everything in it.
    pub async fn delete_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        info!(table = %name, "table deleted");
        Ok(())
    }

    /// Whether the named table exists.
    pub async fn table_exists(&self, name: &str) -> bool {
        self.tables.read().await.contains_key(name)
    }

    /// All table names, sorted.
    pub async fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Describes a table: key schema, indexes, GSI readiness states.
    pub async fn describe_table(&self, name: &str) -> Result<TableDescription> {
        Ok(self.table(name).await?.describe().await)
    }

    /// Adds a global secondary index to an existing table and starts its
    /// backfill. The index serves queries once it reaches
    /// [`IndexState::Active`].
    pub async fn add_global_secondary_index(&self, table: &str, spec: GsiSpec) -> Result<()> {
        self.table(table).await?.add_gsi(spec).await
    }

    /// Removes a global secondary index.
    pub async fn remove_global_secondary_index(&self, table: &str, index: &str) -> Result<()> {
        self.table(table).await?.remove_gsi(index).await
    }

    /// Current lifecycle state of a global secondary index.
    pub async fn index_state(&self, table: &str, index: &str) -> Result<IndexState> {
        let description = self.describe_table(table).await?;
        description
            .global_indexes
            .iter()
            .find(|gsi| gsi.spec.name() == index)
            .map(|gsi| gsi.state)
            .ok_or_else(|| Error::IndexNotFound(index.to_string()))
    }

    // --- Item operations ---

    /// Inserts or fully replaces an item.
    pub async fn put_item(&self, table: &str, item: Item) -> Result<()> {
        self.table(table).await?.put(item, None).await
    }

    /// Inserts or replaces an item only if the precondition holds against
    /// the currently stored item.
    pub async fn put_item_conditional(
        &self,
        table: &str,
        item: Item,
        condition: Precondition,
    ) -> Result<()> {
        self.table(table).await?.put(item, Some(&condition)).await
    }

    /// Fetches an item by primary key. Absence is
    /// [`Error::ItemNotFound`], distinct from an item with no non-key
    /// attributes.
    pub async fn get_item(&self, table: &str, key: Item) -> Result<Item> {
        self.table(table).await?.get(&key).await
    }

    /// Removes an item by primary key. Deleting an absent key is a silent
    /// no-op.
    pub async fn delete_item(&self, table: &str, key: Item) -> Result<()> {
        self.table(table).await?.delete(&key, None).await
    }

    /// Removes an item only if the precondition holds.
    pub async fn delete_item_conditional(
        &self,
        table: &str,
        key: Item,
        condition: Precondition,
    ) -> Result<()> {
        self.table(table).await?.delete(&key, Some(&condition)).await
    }

    /// Merges `updates` into the stored item (creating it when absent) and
    /// returns the new item state. Key attributes cannot be updated.
    pub async fn update_item(&self, table: &str, key: Item, updates: Item) -> Result<Item> {
        self.table(table).await?.update(&key, &updates).await
    }

    // --- Query and scan ---

    /// Evaluates a key-condition query against the base table or a named
    /// secondary index.
    pub async fn query(&self, table: &str, request: QueryRequest) -> Result<QueryOutput> {
        self.table(table).await?.query(&request).await
    }

    /// Walks a whole table or index in key order with an optional
    /// post-read filter.
    pub async fn scan(&self, table: &str, request: ScanRequest) -> Result<QueryOutput> {
        self.table(table).await?.scan(&request).await
    }

    /// Blocks until every global secondary index of the table has applied
    /// all previously committed writes. Primarily for tests and demos;
    /// normal readers tolerate eventual consistency.
    pub async fn flush_indexes(&self, table: &str) -> Result<()> {
        self.table(table).await?.flush_indexes().await;
        Ok(())
    }
}
