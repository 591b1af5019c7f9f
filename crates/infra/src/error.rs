//! Service-level error taxonomy.
//!
//! Domain failures (`DomainError`) and storage failures (`StoreError`) are
//! folded into one `EngineError` so callers handle a single enum.

use stockledger_core::DomainError;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Product or batch absent, or product soft-deleted.
    #[error("not found: {0}")]
    NotFound(String),
    /// Bad quantity, malformed cursor, disallowed status filter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Insufficient stock in a batch or legacy product.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    /// Concurrent writer won every retry.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Storage I/O failure or deadline exceeded.
    #[error("internal: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// gRPC-style status name.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::InvalidArgument(_) => "INVALID_ARGUMENT",
            EngineError::FailedPrecondition(_) => "FAILED_PRECONDITION",
            EngineError::Conflict(_) => "ABORTED",
            EngineError::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::NotFound(msg) => EngineError::NotFound(msg),
            DomainError::InvalidArgument(msg) | DomainError::InvalidId(msg) => {
                EngineError::InvalidArgument(msg)
            }
            DomainError::FailedPrecondition(msg) => EngineError::FailedPrecondition(msg),
            DomainError::Conflict(msg) => EngineError::Conflict(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::NotFound(msg) => EngineError::NotFound(msg),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_onto_taxonomy() {
        let err: EngineError = DomainError::insufficient_stock(5, 2).into();
        assert!(matches!(err, EngineError::FailedPrecondition(_)));
        assert_eq!(err.code(), "FAILED_PRECONDITION");

        let err: EngineError = DomainError::invalid_id("ProductId cannot be empty").into();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn backend_failures_are_internal() {
        let err: EngineError = StoreError::Backend("connection reset".into()).into();
        assert_eq!(err.code(), "INTERNAL");
        let err: EngineError = StoreError::Conflict("stale".into()).into();
        assert!(err.is_conflict());
    }
}
