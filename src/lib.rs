//! # dynastore
//!
//! An embedded, in-memory key-value store with the data model of a managed
//! NoSQL table service: items are attribute maps addressed by a partition
//! key and an optional sort key, range queries run in either direction with
//! pagination, and secondary indexes widen the queryable surface.
//!
//! Two index flavors with different consistency:
//!
//! - **Local secondary indexes** share the table's partition key, order by
//!   an alternate sort key, and are maintained synchronously — a write is
//!   visible through its LSIs the moment it returns.
//! - **Global secondary indexes** choose both keys freely and are
//!   maintained asynchronously behind an explicit change queue — eventually
//!   consistent, with an observable drain barrier.
//!
//! Persistence, replication, and a network surface are deliberately out of
//! scope; this crate is the indexing and query core such a service sits on.

pub mod error;
pub mod logging;
pub mod store;

pub use error::{Error, Result};
pub use store::{
    AttributeType, Database, FilterCondition, GsiDescription, GsiSpec, IndexState, Item,
    KeyAttribute, KeySchema, KeyValue, LsiSpec, Precondition, PrimaryKey, Projection, QueryOutput,
    QueryRequest, ScanFilter, ScanRequest, SortKeyCondition, TableDescription, TableSpec, Value,
};

#[cfg(test)]
mod tests;
