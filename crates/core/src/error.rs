//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, missing records,
/// insufficient stock, stale versions). Storage failures belong to the
/// infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A product or batch is absent (or the product is soft-deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// Input failed validation (negative/zero quantity, malformed cursor,
    /// unknown status filter, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request is well-formed but the current state cannot satisfy it
    /// (e.g. insufficient stock in a batch).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Optimistic concurrency check failed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier was empty or malformed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Insufficient stock, reported the same way by the ledger and the allocator.
    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::FailedPrecondition(format!(
            "insufficient stock: requested {requested}, available {available}"
        ))
    }
}
