//! # Storage core
//!
//! An embedded key-value store with partition/sort-key tables and secondary
//! indexes.
//!
//! ## Components
//!
//! - [`Database`]: the table catalog and operation entry point.
//! - [`Item`] / [`Value`]: schemaless attribute maps over a closed tagged
//!   value union.
//! - [`TableSpec`] / [`KeySchema`] / [`LsiSpec`] / [`GsiSpec`]: table and
//!   index definitions.
//! - [`QueryRequest`] / [`ScanRequest`]: read operations with key
//!   conditions, direction, limits, and continuation keys.
//!
//! ## Consistency
//!
//! Base-table reads and local secondary indexes are strongly consistent
//! with writes (maintained under the table's write lock). Global secondary
//! indexes are eventually consistent: entries are recomputed by a consumer
//! task behind a per-index change queue, and a reader racing the consumer
//! may observe a stale or missing entry. [`Database::flush_indexes`] awaits
//! a barrier through every queue when a test or demo needs to observe the
//! settled state.

mod database;
mod gsi;
mod index;
mod item;
mod query;
mod schema;
mod table;
mod value;

pub use database::Database;
pub use index::PrimaryKey;
pub use item::Item;
pub use query::{
    FilterCondition, QueryOutput, QueryRequest, ScanFilter, ScanRequest, SortKeyCondition,
};
pub use schema::{
    AttributeType, GsiSpec, IndexState, KeyAttribute, KeySchema, LsiSpec, Projection, TableSpec,
};
pub use table::{GsiDescription, Precondition, TableDescription};
pub use value::{KeyValue, Value};
