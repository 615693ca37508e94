//! Error types for the storage core.
//!
//! Every fallible operation returns [`Result`]. Errors are synchronous and
//! local to the failing call: validation rejects before any mutation, and a
//! failed write leaves no partial index state behind.

use thiserror::Error;

/// Unified error type for catalog, item, and query operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request: missing or mistyped key attribute, an invalid
    /// condition shape, a bad index definition. Rejected before any mutation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The named table does not exist in the catalog.
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// A table with this name already exists.
    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),

    /// The named index does not exist on the target table.
    #[error("index '{0}' not found")]
    IndexNotFound(String),

    /// An index with this name already exists on the target table.
    #[error("index '{0}' already exists")]
    IndexAlreadyExists(String),

    /// Get on an absent primary key. Distinct from an empty item; deletes of
    /// absent keys are silent no-ops and never produce this.
    #[error("item not found")]
    ItemNotFound,

    /// Query against a global secondary index that is still backfilling (or
    /// being removed) and cannot serve reads yet.
    #[error("index '{0}' is not ready for queries")]
    IndexNotReady(String),

    /// A conditional write whose precondition did not hold against the
    /// current stored item. Nothing was mutated.
    #[error("conditional check failed: {0}")]
    ConditionFailed(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
