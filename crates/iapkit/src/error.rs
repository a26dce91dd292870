//! Error types for the Store.

use iapkit_core::{ProductId, ReceiptError};
use iapkit_queue::{CatalogError, QueueError, ValidatorError};
use iapkit_reconcile::TransactionError;
use thiserror::Error;

/// Errors that can occur during Store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The user cannot authorize payments on this device.
    #[error("payments are not allowed")]
    PaymentsNotAllowed,

    /// The catalog does not know the product.
    #[error("invalid product id: {0}")]
    InvalidProductId(ProductId),

    /// Product metadata could not be fetched.
    #[error("product fetch failed: {0}")]
    ProductFetchFailed(#[from] CatalogError),

    /// Payment queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The queue reported an update that contradicts the request.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Receipt validation service error.
    #[error("validator error: {0}")]
    Validator(#[from] ValidatorError),

    /// Receipt content error.
    #[error("receipt error: {0}")]
    Receipt(#[from] ReceiptError),
}

impl StoreError {
    /// Whether the user backed out of a purchase.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StoreError::Queue(e) if e.is_cancellation())
    }
}

impl From<TransactionError> for StoreError {
    fn from(error: TransactionError) -> Self {
        match error {
            TransactionError::Queue(e) => StoreError::Queue(e),
            TransactionError::InternalInconsistency(message) => {
                StoreError::InternalInconsistency(message)
            }
        }
    }
}

/// Result type for Store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
