//! Error taxonomy for the local store and access-rights engine.

use thiserror::Error;

/// Errors surfaced by `LocalStore` operations.
///
/// `Conflict` and `NotFound` are rejected before the outbox is touched;
/// `Storage` wraps any fault from the underlying database and is never
/// swallowed — callers decide retry policy.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness violation (duplicate room number/building pair,
    /// duplicate badge id, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation referenced an id that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied fields failed validation.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Fault in the underlying persistence layer.
    #[error("storage: {0}")]
    Storage(#[from] duckdb::Error),

    /// A stored payload or denormalized column failed to (de)serialize.
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
