//! Error types reported by the platform collaborators.

use iapkit_core::ReceiptError;
use thiserror::Error;

/// Errors from the payment queue.
///
/// Also the payload of [`TransactionState::Failed`](crate::TransactionState::Failed),
/// where it describes why the platform failed a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("unknown payment error: {0}")]
    Unknown(String),

    #[error("client is not allowed to issue the request")]
    ClientInvalid,

    #[error("payment cancelled by user")]
    PaymentCancelled,

    #[error("payment parameters were not recognized")]
    PaymentInvalid,

    #[error("user is not allowed to authorize payments")]
    PaymentNotAllowed,

    #[error("product is not available in the current storefront")]
    ProductNotAvailable,

    #[error("network error: {0}")]
    Network(String),

    /// The queue stopped delivering events before the request resolved.
    #[error("payment queue closed")]
    Closed,
}

impl QueueError {
    /// Whether the user backed out, as opposed to something going wrong.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, QueueError::PaymentCancelled)
    }
}

/// Errors from the product catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(String),
}

/// Errors from the receipt validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidatorError {
    #[error("no receipt data")]
    NoReceiptData,

    #[error("network error: {0}")]
    Network(String),

    #[error("receipt error: {0}")]
    Receipt(#[from] ReceiptError),
}
