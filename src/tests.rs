//! Integration tests for the storage core.
//!
//! These tests cover:
//! - Table creation and catalog management
//! - Basic CRUD operations and validation
//! - Local secondary indexes (synchronous visibility, sparsity, ordering)
//! - Global secondary indexes (backfill, projection, eventual consistency)
//! - Querying and scanning with conditions, filters, and pagination
//!
//! The tests run on the default current-thread runtime, which makes the GSI
//! consumer deterministic: a spawned consumer cannot run before the test
//! yields to the scheduler, and `flush_indexes` is a hard barrier behind
//! which every enqueued change has been applied.

use tracing::instrument;

use crate::error::Error;
use crate::store::{
    AttributeType, Database, FilterCondition, GsiSpec, IndexState, Item, KeyAttribute, KeySchema,
    LsiSpec, Precondition, Projection, QueryOutput, QueryRequest, ScanFilter, ScanRequest,
    SortKeyCondition, TableSpec, Value,
};

const PRODUCTS_TABLE: &str = "test-products";
const CATEGORY_PARTITION_KEY: &str = "category";
const PRODUCT_NAME_SORT_KEY: &str = "product_name";
const PRICE_ATTRIBUTE: &str = "price";

const DECK_TABLE: &str = "deck";
const LAST_UPDATED_INDEX: &str = "LastUpdated-index";

const LOG_TABLE: &str = "weblog";
const DATE_CODE_INDEX: &str = "Date-ResponseCode-index";

#[instrument(skip(db))]
async fn setup_products_table(db: &Database) -> crate::Result<()> {
    db.create_table(TableSpec::new(
        PRODUCTS_TABLE,
        KeySchema::new(
            KeyAttribute::new(CATEGORY_PARTITION_KEY, AttributeType::String),
            Some(KeyAttribute::new(PRODUCT_NAME_SORT_KEY, AttributeType::String)),
        ),
    ))
    .await
}

#[instrument(skip(db))]
async fn setup_deck_table(db: &Database) -> crate::Result<()> {
    db.create_table(
        TableSpec::new(
            DECK_TABLE,
            KeySchema::new(
                KeyAttribute::new("UserId", AttributeType::String),
                Some(KeyAttribute::new("DeckId", AttributeType::String)),
            ),
        )
        .with_local_index(LsiSpec::new(
            LAST_UPDATED_INDEX,
            KeyAttribute::new("LastUpdatedDateTime", AttributeType::Number),
        )),
    )
    .await
}

fn product(category: &str, name: &str, price: f64) -> Item {
    Item::new()
        .set_string(CATEGORY_PARTITION_KEY, category)
        .set_string(PRODUCT_NAME_SORT_KEY, name)
        .set_number(PRICE_ATTRIBUTE, price)
}

fn product_key(category: &str, name: &str) -> Item {
    Item::new()
        .set_string(CATEGORY_PARTITION_KEY, category)
        .set_string(PRODUCT_NAME_SORT_KEY, name)
}

fn sorted_names(output: &QueryOutput) -> Vec<String> {
    output
        .items
        .iter()
        .filter_map(|item| item.get_string(PRODUCT_NAME_SORT_KEY))
        .map(String::from)
        .collect()
}

// --- Catalog ---

#[tokio::test]
async fn test_create_and_describe_table() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;

    assert!(db.table_exists(PRODUCTS_TABLE).await);
    assert_eq!(db.list_tables().await, vec![PRODUCTS_TABLE.to_string()]);

    let description = db.describe_table(PRODUCTS_TABLE).await?;
    assert_eq!(description.name, PRODUCTS_TABLE);
    assert_eq!(
        description.key_schema.partition().name(),
        CATEGORY_PARTITION_KEY
    );
    assert_eq!(description.item_count, 0);
    assert!(description.local_indexes.is_empty());
    assert!(description.global_indexes.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_create_table_already_exists() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;

    let result = setup_products_table(&db).await;
    assert!(matches!(result, Err(Error::TableAlreadyExists(_))));
    Ok(())
}

#[tokio::test]
async fn test_delete_table() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    db.delete_table(PRODUCTS_TABLE).await?;

    assert!(!db.table_exists(PRODUCTS_TABLE).await);
    assert!(matches!(
        db.delete_table(PRODUCTS_TABLE).await,
        Err(Error::TableNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_operations_against_missing_table() {
    let db = Database::new();
    let result = db.put_item("phantom", Item::new().set_string("id", "1")).await;
    assert!(matches!(result, Err(Error::TableNotFound(_))));
}

// --- CRUD ---

#[tokio::test]
async fn test_put_get_round_trip() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;

    let item = product("Electronics", "Smartphone", 599.99).set_bool("in_stock", true);
    db.put_item(PRODUCTS_TABLE, item.clone()).await?;

    let read = db
        .get_item(PRODUCTS_TABLE, product_key("Electronics", "Smartphone"))
        .await?;
    assert_eq!(read, item);
    Ok(())
}

#[tokio::test]
async fn test_put_replaces_whole_item() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;

    db.put_item(
        PRODUCTS_TABLE,
        product("Books", "Novel", 12.0).set_string("author", "someone"),
    )
    .await?;
    db.put_item(PRODUCTS_TABLE, product("Books", "Novel", 14.0)).await?;

    let read = db
        .get_item(PRODUCTS_TABLE, product_key("Books", "Novel"))
        .await?;
    assert_eq!(read.get_number(PRICE_ATTRIBUTE), Some(14.0));
    assert!(!read.contains("author"));
    Ok(())
}

#[tokio::test]
async fn test_get_absent_item_is_not_found() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;

    let result = db
        .get_item(PRODUCTS_TABLE, product_key("Electronics", "Nothing"))
        .await;
    assert!(matches!(result, Err(Error::ItemNotFound)));
    Ok(())
}

#[tokio::test]
async fn test_delete_absent_key_is_a_noop() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    db.put_item(PRODUCTS_TABLE, product("Books", "Novel", 12.0)).await?;

    db.delete_item(PRODUCTS_TABLE, product_key("Books", "Phantom"))
        .await?;

    let description = db.describe_table(PRODUCTS_TABLE).await?;
    assert_eq!(description.item_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_put_missing_key_attribute_is_rejected() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;

    let result = db
        .put_item(
            PRODUCTS_TABLE,
            Item::new().set_string(CATEGORY_PARTITION_KEY, "Electronics"),
        )
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let description = db.describe_table(PRODUCTS_TABLE).await?;
    assert_eq!(description.item_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_put_mistyped_key_attribute_is_rejected() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;

    let result = db
        .put_item(
            PRODUCTS_TABLE,
            Item::new()
                .set_string(CATEGORY_PARTITION_KEY, "Electronics")
                .set_number(PRODUCT_NAME_SORT_KEY, 1.0),
        )
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn test_update_item_merges_attributes() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    db.put_item(PRODUCTS_TABLE, product("Electronics", "Smartphone", 599.99))
        .await?;

    let updated = db
        .update_item(
            PRODUCTS_TABLE,
            product_key("Electronics", "Smartphone"),
            Item::new().set_number(PRICE_ATTRIBUTE, 649.99),
        )
        .await?;
    assert_eq!(updated.get_number(PRICE_ATTRIBUTE), Some(649.99));

    let read = db
        .get_item(PRODUCTS_TABLE, product_key("Electronics", "Smartphone"))
        .await?;
    assert_eq!(read.get_number(PRICE_ATTRIBUTE), Some(649.99));
    assert_eq!(read.get_string(CATEGORY_PARTITION_KEY), Some("Electronics"));
    Ok(())
}

#[tokio::test]
async fn test_update_item_rejects_key_attributes() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    db.put_item(PRODUCTS_TABLE, product("Electronics", "Smartphone", 599.99))
        .await?;

    let result = db
        .update_item(
            PRODUCTS_TABLE,
            product_key("Electronics", "Smartphone"),
            Item::new().set_string(PRODUCT_NAME_SORT_KEY, "Tablet"),
        )
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn test_conditional_put() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;

    // Insert-if-absent succeeds the first time and conflicts the second.
    let insert_only = Precondition::AttributeNotExists(CATEGORY_PARTITION_KEY.to_string());
    db.put_item_conditional(
        PRODUCTS_TABLE,
        product("Books", "Novel", 12.0),
        insert_only.clone(),
    )
    .await?;

    let result = db
        .put_item_conditional(
            PRODUCTS_TABLE,
            product("Books", "Novel", 99.0),
            insert_only,
        )
        .await;
    assert!(matches!(result, Err(Error::ConditionFailed(_))));

    // The failed write left the stored item untouched.
    let read = db
        .get_item(PRODUCTS_TABLE, product_key("Books", "Novel"))
        .await?;
    assert_eq!(read.get_number(PRICE_ATTRIBUTE), Some(12.0));
    Ok(())
}

#[tokio::test]
async fn test_conditional_delete_expected_value() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    db.put_item(PRODUCTS_TABLE, product("Books", "Novel", 12.0)).await?;

    let wrong_price = Precondition::ValueEquals(PRICE_ATTRIBUTE.to_string(), Value::N(99.0));
    let result = db
        .delete_item_conditional(PRODUCTS_TABLE, product_key("Books", "Novel"), wrong_price)
        .await;
    assert!(matches!(result, Err(Error::ConditionFailed(_))));

    let right_price = Precondition::ValueEquals(PRICE_ATTRIBUTE.to_string(), Value::N(12.0));
    db.delete_item_conditional(PRODUCTS_TABLE, product_key("Books", "Novel"), right_price)
        .await?;
    assert!(matches!(
        db.get_item(PRODUCTS_TABLE, product_key("Books", "Novel")).await,
        Err(Error::ItemNotFound)
    ));
    Ok(())
}

// --- Base-table queries ---

#[tokio::test]
async fn test_query_with_sort_key_conditions() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    for name in ["Camera", "Laptop", "Phone", "Printer", "Projector"] {
        db.put_item(PRODUCTS_TABLE, product("Electronics", name, 100.0))
            .await?;
    }

    let begins = db
        .query(
            PRODUCTS_TABLE,
            QueryRequest::new(Value::S("Electronics".into())).with_sort_condition(
                SortKeyCondition::BeginsWith("P".into()),
            ),
        )
        .await?;
    assert_eq!(sorted_names(&begins), vec!["Phone", "Printer", "Projector"]);

    let between = db
        .query(
            PRODUCTS_TABLE,
            QueryRequest::new(Value::S("Electronics".into())).with_sort_condition(
                SortKeyCondition::Between(Value::S("Camera".into()), Value::S("Phone".into())),
            ),
        )
        .await?;
    assert_eq!(sorted_names(&between), vec!["Camera", "Laptop", "Phone"]);

    let greater = db
        .query(
            PRODUCTS_TABLE,
            QueryRequest::new(Value::S("Electronics".into()))
                .with_sort_condition(SortKeyCondition::Gt(Value::S("Phone".into()))),
        )
        .await?;
    assert_eq!(sorted_names(&greater), vec!["Printer", "Projector"]);
    Ok(())
}

#[tokio::test]
async fn test_query_other_partition_is_invisible() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    db.put_item(PRODUCTS_TABLE, product("Electronics", "Phone", 100.0))
        .await?;
    db.put_item(PRODUCTS_TABLE, product("Books", "Novel", 12.0)).await?;

    let output = db
        .query(
            PRODUCTS_TABLE,
            QueryRequest::new(Value::S("Electronics".into())),
        )
        .await?;
    assert_eq!(output.count, 1);
    assert_eq!(sorted_names(&output), vec!["Phone"]);
    Ok(())
}

#[tokio::test]
async fn test_query_reverse_is_exact_mirror() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    for name in ["A", "B", "C", "D"] {
        db.put_item(PRODUCTS_TABLE, product("Electronics", name, 1.0))
            .await?;
    }

    let forward = db
        .query(
            PRODUCTS_TABLE,
            QueryRequest::new(Value::S("Electronics".into())),
        )
        .await?;
    let backward = db
        .query(
            PRODUCTS_TABLE,
            QueryRequest::new(Value::S("Electronics".into())).scan_forward(false),
        )
        .await?;

    let mut reversed = sorted_names(&forward);
    reversed.reverse();
    assert_eq!(sorted_names(&backward), reversed);
    Ok(())
}

#[tokio::test]
async fn test_query_pagination_concatenates() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    for name in ["A", "B", "C", "D", "E"] {
        db.put_item(PRODUCTS_TABLE, product("Electronics", name, 1.0))
            .await?;
    }

    let unlimited = db
        .query(
            PRODUCTS_TABLE,
            QueryRequest::new(Value::S("Electronics".into())),
        )
        .await?;
    assert!(unlimited.last_evaluated_key.is_none());

    let mut paged = Vec::new();
    let mut start_key = None;
    loop {
        let mut request =
            QueryRequest::new(Value::S("Electronics".into())).with_limit(1);
        if let Some(key) = start_key {
            request = request.with_start_key(key);
        }
        let page = db.query(PRODUCTS_TABLE, request).await?;
        assert!(page.count <= 1);
        paged.extend(sorted_names(&page));
        match page.last_evaluated_key {
            Some(key) => start_key = Some(key),
            None => break,
        }
    }
    assert_eq!(paged, sorted_names(&unlimited));
    Ok(())
}

#[tokio::test]
async fn test_query_rejects_zero_limit_and_bad_condition_types() -> crate::Result<()> {
    let db = Database::new();
    setup_deck_table(&db).await?;

    let zero = db
        .query(
            DECK_TABLE,
            QueryRequest::new(Value::S("dongkyun".into())).with_limit(0),
        )
        .await;
    assert!(matches!(zero, Err(Error::Validation(_))));

    // begins_with over the numeric LSI sort key.
    let begins = db
        .query(
            DECK_TABLE,
            QueryRequest::new(Value::S("dongkyun".into()))
                .with_index(LAST_UPDATED_INDEX)
                .with_sort_condition(SortKeyCondition::BeginsWith("15".into())),
        )
        .await;
    assert!(matches!(begins, Err(Error::Validation(_))));

    // Mistyped partition value.
    let mistyped = db
        .query(DECK_TABLE, QueryRequest::new(Value::N(1.0)))
        .await;
    assert!(matches!(mistyped, Err(Error::Validation(_))));
    Ok(())
}

// --- Scans ---

#[tokio::test]
async fn test_scan_with_filter_reports_examined_count() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    for i in 1..=5 {
        db.put_item(
            PRODUCTS_TABLE,
            product(&format!("Category{i}"), &format!("Product{i}"), (i as f64) * 10.0),
        )
        .await?;
    }

    let output = db
        .scan(
            PRODUCTS_TABLE,
            ScanRequest::new().with_filter(ScanFilter::new(
                PRICE_ATTRIBUTE,
                FilterCondition::Gt(Value::N(25.0)),
            )),
        )
        .await?;
    // Filtering happens after the read: every item was examined.
    assert_eq!(output.count, 3);
    assert_eq!(output.scanned_count, 5);
    Ok(())
}

#[tokio::test]
async fn test_scan_pagination_limits_examined_items() -> crate::Result<()> {
    let db = Database::new();
    setup_products_table(&db).await?;
    for i in 1..=4 {
        db.put_item(
            PRODUCTS_TABLE,
            product(&format!("Category{i}"), &format!("Product{i}"), (i as f64) * 10.0),
        )
        .await?;
    }

    let filter = ScanFilter::new(PRICE_ATTRIBUTE, FilterCondition::Ge(Value::N(30.0)));
    let mut collected = Vec::new();
    let mut examined = 0;
    let mut start_key = None;
    loop {
        let mut request = ScanRequest::new().with_filter(filter.clone()).with_limit(2);
        if let Some(key) = start_key {
            request = request.with_start_key(key);
        }
        let page = db.scan(PRODUCTS_TABLE, request).await?;
        assert!(page.scanned_count <= 2);
        examined += page.scanned_count;
        collected.extend(sorted_names(&page));
        match page.last_evaluated_key {
            Some(key) => start_key = Some(key),
            None => break,
        }
    }
    assert_eq!(examined, 4);
    assert_eq!(collected, vec!["Product3", "Product4"]);
    Ok(())
}

// --- Local secondary indexes ---

#[tokio::test]
async fn test_lsi_recency_query() -> crate::Result<()> {
    let db = Database::new();
    setup_deck_table(&db).await?;

    db.put_item(
        DECK_TABLE,
        Item::new()
            .set_string("UserId", "dongkyun")
            .set_string("DeckId", "AWS")
            .set_number("LastUpdatedDateTime", 1_500_000_000.0),
    )
    .await?;
    db.put_item(
        DECK_TABLE,
        Item::new()
            .set_string("UserId", "dongkyun")
            .set_string("DeckId", "Python")
            .set_number("LastUpdatedDateTime", 1_500_500_000.0),
    )
    .await?;

    let output = db
        .query(
            DECK_TABLE,
            QueryRequest::new(Value::S("dongkyun".into()))
                .with_index(LAST_UPDATED_INDEX)
                .scan_forward(false),
        )
        .await?;
    let decks: Vec<_> = output
        .items
        .iter()
        .filter_map(|item| item.get_string("DeckId"))
        .collect();
    assert_eq!(decks, vec!["Python", "AWS"]);
    Ok(())
}

#[tokio::test]
async fn test_lsi_is_synchronously_visible_and_sparse() -> crate::Result<()> {
    let db = Database::new();
    setup_deck_table(&db).await?;

    // No flush anywhere: LSI maintenance is part of the write itself.
    db.put_item(
        DECK_TABLE,
        Item::new()
            .set_string("UserId", "dongkyun")
            .set_string("DeckId", "AWS")
            .set_number("LastUpdatedDateTime", 1.0),
    )
    .await?;
    // This deck has no LastUpdatedDateTime: present in the base table,
    // invisible to the index.
    db.put_item(
        DECK_TABLE,
        Item::new()
            .set_string("UserId", "dongkyun")
            .set_string("DeckId", "Rust"),
    )
    .await?;

    let indexed = db
        .query(
            DECK_TABLE,
            QueryRequest::new(Value::S("dongkyun".into())).with_index(LAST_UPDATED_INDEX),
        )
        .await?;
    assert_eq!(indexed.count, 1);
    assert_eq!(indexed.items[0].get_string("DeckId"), Some("AWS"));

    let base = db
        .query(DECK_TABLE, QueryRequest::new(Value::S("dongkyun".into())))
        .await?;
    assert_eq!(base.count, 2);
    Ok(())
}

#[tokio::test]
async fn test_lsi_entry_follows_updates_and_deletes() -> crate::Result<()> {
    let db = Database::new();
    setup_deck_table(&db).await?;

    let base_item = Item::new()
        .set_string("UserId", "dongkyun")
        .set_string("DeckId", "AWS")
        .set_number("LastUpdatedDateTime", 1.0);
    db.put_item(DECK_TABLE, base_item).await?;

    // Replacing without the indexed attribute removes the entry.
    db.put_item(
        DECK_TABLE,
        Item::new()
            .set_string("UserId", "dongkyun")
            .set_string("DeckId", "AWS"),
    )
    .await?;
    let output = db
        .query(
            DECK_TABLE,
            QueryRequest::new(Value::S("dongkyun".into())).with_index(LAST_UPDATED_INDEX),
        )
        .await?;
    assert_eq!(output.count, 0);

    // Updating it back in reindexes; deleting the item removes the entry.
    db.update_item(
        DECK_TABLE,
        Item::new()
            .set_string("UserId", "dongkyun")
            .set_string("DeckId", "AWS"),
        Item::new().set_number("LastUpdatedDateTime", 2.0),
    )
    .await?;
    let output = db
        .query(
            DECK_TABLE,
            QueryRequest::new(Value::S("dongkyun".into())).with_index(LAST_UPDATED_INDEX),
        )
        .await?;
    assert_eq!(output.count, 1);

    db.delete_item(
        DECK_TABLE,
        Item::new()
            .set_string("UserId", "dongkyun")
            .set_string("DeckId", "AWS"),
    )
    .await?;
    let output = db
        .query(
            DECK_TABLE,
            QueryRequest::new(Value::S("dongkyun".into())).with_index(LAST_UPDATED_INDEX),
        )
        .await?;
    assert_eq!(output.count, 0);
    Ok(())
}

#[tokio::test]
async fn test_lsi_duplicate_sort_keys_page_in_insertion_order() -> crate::Result<()> {
    let db = Database::new();
    setup_deck_table(&db).await?;

    // Three decks updated at the same instant: the index retains all three
    // as distinct entries in stable insertion order.
    for deck in ["zeta", "alpha", "midway"] {
        db.put_item(
            DECK_TABLE,
            Item::new()
                .set_string("UserId", "dongkyun")
                .set_string("DeckId", deck)
                .set_number("LastUpdatedDateTime", 7.0),
        )
        .await?;
    }

    let unlimited = db
        .query(
            DECK_TABLE,
            QueryRequest::new(Value::S("dongkyun".into())).with_index(LAST_UPDATED_INDEX),
        )
        .await?;
    let decks: Vec<_> = unlimited
        .items
        .iter()
        .filter_map(|item| item.get_string("DeckId"))
        .collect();
    assert_eq!(decks, vec!["zeta", "alpha", "midway"]);

    // limit=1 pages concatenate to the same sequence, resuming through the
    // back-referenced primary key.
    let mut paged = Vec::new();
    let mut start_key = None;
    loop {
        let mut request = QueryRequest::new(Value::S("dongkyun".into()))
            .with_index(LAST_UPDATED_INDEX)
            .with_limit(1);
        if let Some(key) = start_key {
            request = request.with_start_key(key);
        }
        let page = db.query(DECK_TABLE, request).await?;
        paged.extend(
            page.items
                .iter()
                .filter_map(|item| item.get_string("DeckId").map(String::from)),
        );
        match page.last_evaluated_key {
            Some(key) => start_key = Some(key),
            None => break,
        }
    }
    assert_eq!(paged, vec!["zeta", "alpha", "midway"]);
    Ok(())
}

// --- Global secondary indexes ---

async fn setup_log_table_with_gsi(db: &Database) -> crate::Result<()> {
    db.create_table(TableSpec::new(
        LOG_TABLE,
        KeySchema::new(KeyAttribute::new("RequestId", AttributeType::String), None),
    ))
    .await?;
    db.add_global_secondary_index(
        LOG_TABLE,
        GsiSpec::new(
            DATE_CODE_INDEX,
            KeySchema::new(
                KeyAttribute::new("Date", AttributeType::String),
                Some(KeyAttribute::new("ResponseCode", AttributeType::Number)),
            ),
        )
        .with_projection(Projection::include(["Hour"])),
    )
    .await
}

fn log_entry(request_id: &str, date: &str, code: f64, hour: &str) -> Item {
    Item::new()
        .set_string("RequestId", request_id)
        .set_string("Date", date)
        .set_number("ResponseCode", code)
        .set_string("Hour", hour)
        .set_string("Path", "/x")
}

#[tokio::test]
async fn test_gsi_include_projection() -> crate::Result<()> {
    let db = Database::new();
    setup_log_table_with_gsi(&db).await?;

    db.put_item(LOG_TABLE, log_entry("R1", "2017-07-20", 302.0, "20"))
        .await?;
    db.flush_indexes(LOG_TABLE).await?;

    let output = db
        .query(
            LOG_TABLE,
            QueryRequest::new(Value::S("2017-07-20".into()))
                .with_index(DATE_CODE_INDEX)
                .with_sort_condition(SortKeyCondition::Eq(Value::N(302.0))),
        )
        .await?;
    assert_eq!(output.count, 1);

    // Keys (base + index) and the INCLUDE allowlist are projected; nothing
    // else is.
    let entry = &output.items[0];
    assert_eq!(entry.get_string("RequestId"), Some("R1"));
    assert_eq!(entry.get_string("Date"), Some("2017-07-20"));
    assert_eq!(entry.get_number("ResponseCode"), Some(302.0));
    assert_eq!(entry.get_string("Hour"), Some("20"));
    assert!(!entry.contains("Path"));
    Ok(())
}

#[tokio::test]
async fn test_gsi_backfills_existing_items() -> crate::Result<()> {
    let db = Database::new();
    db.create_table(TableSpec::new(
        LOG_TABLE,
        KeySchema::new(KeyAttribute::new("RequestId", AttributeType::String), None),
    ))
    .await?;

    // Items exist before the index does.
    db.put_item(LOG_TABLE, log_entry("R1", "2017-07-20", 200.0, "10"))
        .await?;
    db.put_item(LOG_TABLE, log_entry("R2", "2017-07-20", 404.0, "11"))
        .await?;
    // Sparse: no Date attribute, never indexed.
    db.put_item(
        LOG_TABLE,
        Item::new().set_string("RequestId", "R3").set_number("ResponseCode", 500.0),
    )
    .await?;

    db.add_global_secondary_index(
        LOG_TABLE,
        GsiSpec::new(
            DATE_CODE_INDEX,
            KeySchema::new(
                KeyAttribute::new("Date", AttributeType::String),
                Some(KeyAttribute::new("ResponseCode", AttributeType::Number)),
            ),
        ),
    )
    .await?;
    db.flush_indexes(LOG_TABLE).await?;
    assert_eq!(
        db.index_state(LOG_TABLE, DATE_CODE_INDEX).await?,
        IndexState::Active
    );

    let output = db
        .query(
            LOG_TABLE,
            QueryRequest::new(Value::S("2017-07-20".into())).with_index(DATE_CODE_INDEX),
        )
        .await?;
    let codes: Vec<_> = output
        .items
        .iter()
        .filter_map(|item| item.get_number("ResponseCode"))
        .collect();
    assert_eq!(codes, vec![200.0, 404.0]);
    Ok(())
}

#[tokio::test]
async fn test_gsi_not_ready_while_creating() -> crate::Result<()> {
    let db = Database::new();
    setup_log_table_with_gsi(&db).await?;

    // On the current-thread runtime the consumer has not run yet, so the
    // index is still backfilling from this task's point of view.
    assert_eq!(
        db.index_state(LOG_TABLE, DATE_CODE_INDEX).await?,
        IndexState::Creating
    );
    let result = db
        .query(
            LOG_TABLE,
            QueryRequest::new(Value::S("2017-07-20".into())).with_index(DATE_CODE_INDEX),
        )
        .await;
    assert!(matches!(result, Err(Error::IndexNotReady(_))));

    db.flush_indexes(LOG_TABLE).await?;
    assert_eq!(
        db.index_state(LOG_TABLE, DATE_CODE_INDEX).await?,
        IndexState::Active
    );
    Ok(())
}

#[tokio::test]
async fn test_gsi_is_eventually_consistent() -> crate::Result<()> {
    let db = Database::new();
    setup_log_table_with_gsi(&db).await?;
    db.flush_indexes(LOG_TABLE).await?;

    db.put_item(LOG_TABLE, log_entry("R1", "2017-07-20", 302.0, "20"))
        .await?;

    // The write has returned but the consumer has not run: the entry is not
    // visible through the index yet (no read-your-own-write through a GSI).
    let before = db
        .query(
            LOG_TABLE,
            QueryRequest::new(Value::S("2017-07-20".into())).with_index(DATE_CODE_INDEX),
        )
        .await?;
    assert_eq!(before.count, 0);

    db.flush_indexes(LOG_TABLE).await?;
    let after = db
        .query(
            LOG_TABLE,
            QueryRequest::new(Value::S("2017-07-20".into())).with_index(DATE_CODE_INDEX),
        )
        .await?;
    assert_eq!(after.count, 1);
    Ok(())
}

#[tokio::test]
async fn test_gsi_applies_updates_and_deletes_in_order() -> crate::Result<()> {
    let db = Database::new();
    setup_log_table_with_gsi(&db).await?;

    db.put_item(LOG_TABLE, log_entry("R1", "2017-07-20", 302.0, "20"))
        .await?;
    // Move the item to a different index partition, then delete it; the
    // consumer applies both in commit order.
    db.put_item(LOG_TABLE, log_entry("R1", "2017-07-21", 302.0, "21"))
        .await?;
    db.delete_item(LOG_TABLE, Item::new().set_string("RequestId", "R1"))
        .await?;
    db.put_item(LOG_TABLE, log_entry("R2", "2017-07-21", 200.0, "09"))
        .await?;
    db.flush_indexes(LOG_TABLE).await?;

    let gone = db
        .query(
            LOG_TABLE,
            QueryRequest::new(Value::S("2017-07-20".into())).with_index(DATE_CODE_INDEX),
        )
        .await?;
    assert_eq!(gone.count, 0);

    let remaining = db
        .query(
            LOG_TABLE,
            QueryRequest::new(Value::S("2017-07-21".into())).with_index(DATE_CODE_INDEX),
        )
        .await?;
    assert_eq!(remaining.count, 1);
    assert_eq!(remaining.items[0].get_string("RequestId"), Some("R2"));
    Ok(())
}

#[tokio::test]
async fn test_gsi_removal() -> crate::Result<()> {
    let db = Database::new();
    setup_log_table_with_gsi(&db).await?;
    db.flush_indexes(LOG_TABLE).await?;

    db.remove_global_secondary_index(LOG_TABLE, DATE_CODE_INDEX)
        .await?;
    let result = db
        .query(
            LOG_TABLE,
            QueryRequest::new(Value::S("2017-07-20".into())).with_index(DATE_CODE_INDEX),
        )
        .await;
    assert!(matches!(result, Err(Error::IndexNotFound(_))));

    assert!(matches!(
        db.remove_global_secondary_index(LOG_TABLE, DATE_CODE_INDEX).await,
        Err(Error::IndexNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_gsi_name_is_rejected() -> crate::Result<()> {
    let db = Database::new();
    setup_log_table_with_gsi(&db).await?;

    let result = db
        .add_global_secondary_index(
            LOG_TABLE,
            GsiSpec::new(
                DATE_CODE_INDEX,
                KeySchema::new(KeyAttribute::new("Date", AttributeType::String), None),
            ),
        )
        .await;
    assert!(matches!(result, Err(Error::IndexAlreadyExists(_))));
    Ok(())
}

#[tokio::test]
async fn test_gsi_scan_sees_projected_entries() -> crate::Result<()> {
    let db = Database::new();
    setup_log_table_with_gsi(&db).await?;

    db.put_item(LOG_TABLE, log_entry("R1", "2017-07-20", 302.0, "20"))
        .await?;
    db.put_item(LOG_TABLE, log_entry("R2", "2017-07-21", 200.0, "09"))
        .await?;
    db.flush_indexes(LOG_TABLE).await?;

    let output = db
        .scan(LOG_TABLE, ScanRequest::new().with_index(DATE_CODE_INDEX))
        .await?;
    assert_eq!(output.count, 2);
    assert!(output.items.iter().all(|entry| !entry.contains("Path")));
    Ok(())
}
