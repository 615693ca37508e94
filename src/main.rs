use anyhow::Result;
use tracing::info;

use dynastore::{
    AttributeType, Database, GsiSpec, Item, KeyAttribute, KeySchema, LsiSpec, Projection,
    QueryRequest, TableSpec, Value,
};

const DECK_TABLE: &str = "deck";
const LOG_TABLE: &str = "weblog";
const LAST_UPDATED_INDEX: &str = "LastUpdated-index";
const DATE_CODE_INDEX: &str = "Date-ResponseCode-index";

#[tokio::main]
async fn main() -> Result<()> {
    dynastore::logging::init_logging()?;

    let db = Database::new();

    // A flash-card deck table: decks per user, plus a local index ordering
    // each user's decks by last update time.
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
    .await?;

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

    // Most recently updated deck first.
    let recent = db
        .query(
            DECK_TABLE,
            QueryRequest::new(Value::S("dongkyun".into()))
                .with_index(LAST_UPDATED_INDEX)
                .scan_forward(false),
        )
        .await?;
    for item in &recent.items {
        info!(
            deck = item.get_string("DeckId").unwrap_or("?"),
            updated = item.get_number("LastUpdatedDateTime").unwrap_or(0.0),
            "deck"
        );
    }

    // A request-log table with a global index over (Date, ResponseCode),
    // projecting only the Hour attribute alongside the keys.
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
    .await?;

    db.put_item(
        LOG_TABLE,
        Item::new()
            .set_string("RequestId", "R1")
            .set_string("Date", "2017-07-20")
            .set_number("ResponseCode", 302.0)
            .set_string("Hour", "20")
            .set_string("Path", "/x"),
    )
    .await?;

    // The global index is eventually consistent; drain it before querying.
    db.flush_indexes(LOG_TABLE).await?;

    let redirects = db
        .query(
            LOG_TABLE,
            QueryRequest::new(Value::S("2017-07-20".into())).with_index(DATE_CODE_INDEX),
        )
        .await?;
    for entry in &redirects.items {
        info!(entry = %serde_json::to_string(entry)?, "redirect");
    }

    let description = db.describe_table(LOG_TABLE).await?;
    for gsi in &description.global_indexes {
        info!(index = gsi.spec.name(), state = %gsi.state, "index status");
    }

    Ok(())
}
