//! Error types for transaction reconciliation.

use iapkit_queue::QueueError;
use thiserror::Error;

/// Errors a pending request can resolve with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The queue failed the transaction or the request.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The queue reported something that cannot happen for this request,
    /// e.g. a restored transaction while purchasing.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

impl TransactionError {
    pub fn is_internal_inconsistency(&self) -> bool {
        matches!(self, TransactionError::InternalInconsistency(_))
    }
}

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, TransactionError>;
