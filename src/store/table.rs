//! A table: the record store plus its indexes.
//!
//! All synchronous state — the ordered record map and every local secondary
//! index — lives behind one write lock, so a put or delete commits the base
//! row and all LSI rows together and a reader never observes one without
//! the other. GSI change records are enqueued inside the same critical
//! section, which fixes their ordering, but they are applied later by the
//! per-index consumer task.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::gsi::{self, ChangeRecord, GsiData, GsiHandle};
use crate::store::index::{project, IndexMap, PrimaryKey};
use crate::store::item::Item;
use crate::store::query::{
    resolve_partition_value, run_query, run_scan, QueryOutput, QueryRequest, Row, ScanRequest,
    TargetInfo,
};
use crate::store::schema::{GsiSpec, IndexState, KeySchema, LsiSpec, TableSpec};
use crate::store::value::Value;

/// Expected-value precondition for conditional writes. Evaluated against
/// the currently stored item (an absent item has no attributes); failure
/// leaves the store untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The named attribute must be present.
    AttributeExists(String),
    /// The named attribute must be absent. With a key attribute this is the
    /// classic "insert only if the item does not exist".
    AttributeNotExists(String),
    /// The named attribute must equal the value.
    ValueEquals(String, Value),
}

impl Precondition {
    fn check(&self, current: Option<&Item>) -> Result<()> {
        let holds = match self {
            Precondition::AttributeExists(attr) => {
                current.map_or(false, |item| item.contains(attr))
            }
            Precondition::AttributeNotExists(attr) => {
                current.map_or(true, |item| !item.contains(attr))
            }
            Precondition::ValueEquals(attr, want) => current
                .and_then(|item| item.get(attr))
                .map_or(false, |got| got == want),
        };
        if holds {
            Ok(())
        } else {
            Err(Error::ConditionFailed(match self {
                Precondition::AttributeExists(attr) => format!("attribute '{attr}' does not exist"),
                Precondition::AttributeNotExists(attr) => format!("attribute '{attr}' exists"),
                Precondition::ValueEquals(attr, _) => {
                    format!("attribute '{attr}' does not match the expected value")
                }
            }))
        }
    }
}

/// Description of a global secondary index, including its readiness state.
#[derive(Debug, Clone)]
pub struct GsiDescription {
    /// The index definition.
    pub spec: GsiSpec,
    /// Current lifecycle state; only `Active` indexes serve queries.
    pub state: IndexState,
}

/// Description of a table and its indexes.
#[derive(Debug, Clone)]
pub struct TableDescription {
    /// Table name.
    pub name: String,
    /// Primary key schema.
    pub key_schema: KeySchema,
    /// Local secondary indexes (fixed at creation).
    pub local_indexes: Vec<LsiSpec>,
    /// Global secondary indexes, sorted by name.
    pub global_indexes: Vec<GsiDescription>,
    /// Number of items in the base table.
    pub item_count: usize,
}

/// One local secondary index: spec plus its live entry map.
struct LsiRuntime {
    spec: LsiSpec,
    key_attrs: BTreeSet<String>,
    map: IndexMap,
}

impl LsiRuntime {
    fn new(spec: LsiSpec, table_key: &KeySchema) -> Self {
        let key_attrs = table_key
            .attribute_names()
            .chain(std::iter::once(spec.sort_key().name()))
            .map(String::from)
            .collect();
        Self {
            spec,
            key_attrs,
            map: IndexMap::new(),
        }
    }

    /// Recomputes this index's entry for `primary`. Sparse: no alternate
    /// sort key value, no entry.
    fn apply(&mut self, primary: &PrimaryKey, item: &Item) -> Result<()> {
        match self.spec.sort_key().extract(item)? {
            Some(sort) => self.map.upsert(
                primary.clone(),
                primary.partition().clone(),
                Some(sort),
                project(item, self.spec.projection(), &self.key_attrs),
            ),
            None => self.map.remove(primary),
        }
        Ok(())
    }
}

struct TableInner {
    records: BTreeMap<PrimaryKey, Item>,
    lsis: HashMap<String, LsiRuntime>,
    gsis: HashMap<String, GsiHandle>,
}

impl TableInner {
    /// Commits a put: validates index key typing, then replaces the base
    /// row, recomputes every LSI entry, and enqueues one change record per
    /// GSI. Validation precedes any mutation, so a rejected write has no
    /// partial effect.
    fn commit_put(&mut self, primary: PrimaryKey, item: Item) -> Result<()> {
        for lsi in self.lsis.values() {
            lsi.spec.sort_key().extract(&item)?;
        }
        for handle in self.gsis.values() {
            handle.validate_item(&item)?;
        }

        let before = self.records.insert(primary.clone(), item.clone());
        for lsi in self.lsis.values_mut() {
            lsi.apply(&primary, &item)?;
        }
        let change = ChangeRecord {
            before,
            after: Some(item),
        };
        for handle in self.gsis.values() {
            handle.enqueue(change.clone());
        }
        Ok(())
    }

    /// Commits a delete. Returns whether an item was actually removed.
    fn commit_delete(&mut self, primary: &PrimaryKey) -> bool {
        let Some(before) = self.records.remove(primary) else {
            return false;
        };
        for lsi in self.lsis.values_mut() {
            lsi.map.remove(primary);
        }
        let change = ChangeRecord {
            before: Some(before),
            after: None,
        };
        for handle in self.gsis.values() {
            handle.enqueue(change.clone());
        }
        true
    }
}

/// A table and its index structures. Created and owned by the catalog.
pub(crate) struct Table {
    spec: TableSpec,
    inner: RwLock<TableInner>,
}

impl Table {
    pub(crate) fn new(spec: TableSpec) -> Self {
        let lsis = spec
            .local_indexes()
            .iter()
            .map(|lsi| {
                (
                    lsi.name().to_string(),
                    LsiRuntime::new(lsi.clone(), spec.key_schema()),
                )
            })
            .collect();
        let inner = TableInner {
            records: BTreeMap::new(),
            lsis,
            gsis: HashMap::new(),
        };
        Self {
            spec,
            inner: RwLock::new(inner),
        }
    }

    pub(crate) fn spec(&self) -> &TableSpec {
        &self.spec
    }

    fn primary_key_of(&self, item: &Item) -> Result<PrimaryKey> {
        let (partition, sort) = self.spec.key_schema().extract_required(item)?;
        Ok(PrimaryKey::new(partition, sort))
    }

    pub(crate) async fn put(&self, item: Item, condition: Option<&Precondition>) -> Result<()> {
        let primary = self.primary_key_of(&item)?;
        let mut inner = self.inner.write().await;
        if let Some(condition) = condition {
            condition.check(inner.records.get(&primary))?;
        }
        inner.commit_put(primary, item)?;
        info!(table = %self.spec.name(), "item put");
        Ok(())
    }

    pub(crate) async fn get(&self, key: &Item) -> Result<Item> {
        let primary = self.primary_key_of(key)?;
        let inner = self.inner.read().await;
        inner
            .records
            .get(&primary)
            .cloned()
            .ok_or(Error::ItemNotFound)
    }

    pub(crate) async fn delete(&self, key: &Item, condition: Option<&Precondition>) -> Result<()> {
        let primary = self.primary_key_of(key)?;
        let mut inner = self.inner.write().await;
        if let Some(condition) = condition {
            condition.check(inner.records.get(&primary))?;
        }
        if inner.commit_delete(&primary) {
            info!(table = %self.spec.name(), "item deleted");
        } else {
            // Deleting an absent key is an idempotent no-op.
            debug!(table = %self.spec.name(), "delete of absent key ignored");
        }
        Ok(())
    }

    /// Partial attribute update: merges `updates` into the stored item (or
    /// creates one from the key when absent) and commits the result through
    /// the regular put path. Key attributes cannot be updated.
    pub(crate) async fn update(&self, key: &Item, updates: &Item) -> Result<Item> {
        let primary = self.primary_key_of(key)?;
        for attr in self.spec.key_schema().attribute_names() {
            if updates.contains(attr) {
                return Err(Error::Validation(format!(
                    "cannot update key attribute '{attr}'"
                )));
            }
        }

        let mut inner = self.inner.write().await;
        let mut item = match inner.records.get(&primary) {
            Some(current) => current.clone(),
            None => {
                let schema = self.spec.key_schema();
                let mut fresh = Item::new().set_value(
                    schema.partition().name(),
                    primary.partition().clone().into(),
                );
                if let (Some(attr), Some(sort)) = (schema.sort(), primary.sort()) {
                    fresh = fresh.set_value(attr.name(), sort.clone().into());
                }
                fresh
            }
        };
        item.merge(updates);
        inner.commit_put(primary, item.clone())?;
        info!(table = %self.spec.name(), "item updated");
        Ok(item)
    }

    pub(crate) async fn query(&self, req: &QueryRequest) -> Result<QueryOutput> {
        let table_key = self.spec.key_schema();
        match &req.index_name {
            None => {
                let target = TargetInfo::base(table_key);
                let partition =
                    resolve_partition_value(&req.partition_value, target.effective_partition())?;
                let inner = self.inner.read().await;
                let lower = PrimaryKey::new(partition.clone(), None);
                let rows: Vec<Row<'_>> = inner
                    .records
                    .range(lower..)
                    .take_while(|(k, _)| *k.partition() == partition)
                    .map(|(k, v)| Row {
                        partition: k.partition(),
                        sort: k.sort(),
                        item: v,
                        primary: k,
                    })
                    .collect();
                run_query(
                    rows,
                    &target,
                    req.sort_condition.as_ref(),
                    req.scan_forward,
                    req.limit,
                    req.exclusive_start_key.as_ref(),
                )
            }
            Some(name) => {
                let inner = self.inner.read().await;
                if let Some(lsi) = inner.lsis.get(name) {
                    let target =
                        TargetInfo::index(table_key, table_key.partition(), Some(lsi.spec.sort_key()));
                    let partition = resolve_partition_value(
                        &req.partition_value,
                        target.effective_partition(),
                    )?;
                    let rows: Vec<Row<'_>> = lsi
                        .map
                        .partition_entries(&partition)
                        .map(|(k, e)| Row {
                            partition: &k.partition,
                            sort: k.sort.as_ref(),
                            item: &e.attributes,
                            primary: &e.primary,
                        })
                        .collect();
                    return run_query(
                        rows,
                        &target,
                        req.sort_condition.as_ref(),
                        req.scan_forward,
                        req.limit,
                        req.exclusive_start_key.as_ref(),
                    );
                }
                let data = inner
                    .gsis
                    .get(name)
                    .map(|handle| handle.data.clone())
                    .ok_or_else(|| Error::IndexNotFound(name.clone()))?;
                drop(inner);

                if data.state().await != IndexState::Active {
                    return Err(Error::IndexNotReady(name.clone()));
                }
                let index_key = data.spec().key_schema();
                let target = TargetInfo::index(table_key, index_key.partition(), index_key.sort());
                let partition =
                    resolve_partition_value(&req.partition_value, target.effective_partition())?;
                let entries = data.entries.read().await;
                let rows: Vec<Row<'_>> = entries
                    .partition_entries(&partition)
                    .map(|(k, e)| Row {
                        partition: &k.partition,
                        sort: k.sort.as_ref(),
                        item: &e.attributes,
                        primary: &e.primary,
                    })
                    .collect();
                run_query(
                    rows,
                    &target,
                    req.sort_condition.as_ref(),
                    req.scan_forward,
                    req.limit,
                    req.exclusive_start_key.as_ref(),
                )
            }
        }
    }

    pub(crate) async fn scan(&self, req: &ScanRequest) -> Result<QueryOutput> {
        let table_key = self.spec.key_schema();
        match &req.index_name {
            None => {
                let target = TargetInfo::base(table_key);
                let inner = self.inner.read().await;
                let rows: Vec<Row<'_>> = inner
                    .records
                    .iter()
                    .map(|(k, v)| Row {
                        partition: k.partition(),
                        sort: k.sort(),
                        item: v,
                        primary: k,
                    })
                    .collect();
                run_scan(
                    rows,
                    &target,
                    req.filter.as_ref(),
                    req.limit,
                    req.exclusive_start_key.as_ref(),
                )
            }
            Some(name) => {
                let inner = self.inner.read().await;
                if let Some(lsi) = inner.lsis.get(name) {
                    let target =
                        TargetInfo::index(table_key, table_key.partition(), Some(lsi.spec.sort_key()));
                    let rows: Vec<Row<'_>> = lsi
                        .map
                        .iter()
                        .map(|(k, e)| Row {
                            partition: &k.partition,
                            sort: k.sort.as_ref(),
                            item: &e.attributes,
                            primary: &e.primary,
                        })
                        .collect();
                    return run_scan(
                        rows,
                        &target,
                        req.filter.as_ref(),
                        req.limit,
                        req.exclusive_start_key.as_ref(),
                    );
                }
                let data = inner
                    .gsis
                    .get(name)
                    .map(|handle| handle.data.clone())
                    .ok_or_else(|| Error::IndexNotFound(name.clone()))?;
                drop(inner);

                if data.state().await != IndexState::Active {
                    return Err(Error::IndexNotReady(name.clone()));
                }
                let index_key = data.spec().key_schema();
                let target = TargetInfo::index(table_key, index_key.partition(), index_key.sort());
                let entries = data.entries.read().await;
                let rows: Vec<Row<'_>> = entries
                    .iter()
                    .map(|(k, e)| Row {
                        partition: &k.partition,
                        sort: k.sort.as_ref(),
                        item: &e.attributes,
                        primary: &e.primary,
                    })
                    .collect();
                run_scan(
                    rows,
                    &target,
                    req.filter.as_ref(),
                    req.limit,
                    req.exclusive_start_key.as_ref(),
                )
            }
        }
    }

    /// Registers a GSI and starts its consumer: the entry is registered and
    /// the backfill snapshot taken under the write lock, so every later
    /// write lands in the queue and nothing is missed or double-counted.
    pub(crate) async fn add_gsi(&self, spec: GsiSpec) -> Result<()> {
        if spec.name().is_empty() {
            return Err(Error::Validation("index name must not be empty".into()));
        }
        let mut inner = self.inner.write().await;
        if inner.lsis.contains_key(spec.name()) || inner.gsis.contains_key(spec.name()) {
            return Err(Error::IndexAlreadyExists(spec.name().to_string()));
        }

        let name = spec.name().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let data = Arc::new(GsiData::new(spec, self.spec.key_schema().clone()));
        let snapshot: Vec<Item> = inner.records.values().cloned().collect();
        inner.gsis.insert(name.clone(), GsiHandle::new(data.clone(), tx));
        drop(inner);

        tokio::spawn(gsi::run_consumer(data, snapshot, rx));
        info!(table = %self.spec.name(), index = %name, "global index added, backfill started");
        Ok(())
    }

    /// Detaches a GSI. Closing the queue ends the consumer after it drains.
    pub(crate) async fn remove_gsi(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.lsis.contains_key(name) {
            return Err(Error::Validation(format!(
                "local index '{name}' cannot be removed after table creation"
            )));
        }
        let handle = inner
            .gsis
            .remove(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        drop(inner);

        handle.data.set_state(IndexState::Deleting).await;
        info!(table = %self.spec.name(), index = %name, "global index removed");
        Ok(())
    }

    /// Awaits a flush barrier through every GSI queue: once this returns,
    /// all previously committed writes are visible in every global index.
    pub(crate) async fn flush_indexes(&self) {
        let receivers: Vec<_> = {
            let inner = self.inner.read().await;
            inner.gsis.values().map(|handle| handle.flush()).collect()
        };
        for rx in receivers {
            let _ = rx.await;
        }
    }

    pub(crate) async fn describe(&self) -> TableDescription {
        let inner = self.inner.read().await;
        let mut global_indexes = Vec::with_capacity(inner.gsis.len());
        for handle in inner.gsis.values() {
            global_indexes.push(GsiDescription {
                spec: handle.data.spec().clone(),
                state: handle.data.state().await,
            });
        }
        global_indexes.sort_by(|a, b| a.spec.name().cmp(b.spec.name()));
        TableDescription {
            name: self.spec.name().to_string(),
            key_schema: self.spec.key_schema().clone(),
            local_indexes: self.spec.local_indexes().to_vec(),
            global_indexes,
            item_count: inner.records.len(),
        }
    }
}
