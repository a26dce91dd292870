//! Collaborator traits: the abstract interface to the platform.
//!
//! These allow the reconciler and the facade to stay platform-agnostic.
//! Implementations must be thread-safe; the queue in particular is called
//! from request tasks while its events are processed elsewhere.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;

use iapkit_core::{ProductId, ReceiptInfo, TransactionId};

use crate::error::{QueueError, ValidatorError};
use crate::events::{Payment, RetrieveResults};

/// The platform payment queue.
///
/// Calls only enqueue work. Outcomes arrive later as
/// [`QueueEvent`](crate::QueueEvent)s on the channel the platform glue feeds.
#[async_trait]
pub trait PaymentQueue: Send + Sync {
    /// Whether the user is allowed to make payments at all.
    async fn can_make_payments(&self) -> bool;

    /// Submit a payment.
    async fn add_payment(&self, payment: &Payment) -> Result<(), QueueError>;

    /// Ask the platform to re-deliver completed purchases.
    async fn restore_completed_transactions(&self, application_username: &str) -> Result<(), QueueError>;

    /// Acknowledge a transaction so the platform can drop it.
    ///
    /// Finishing an already-finished transaction must succeed.
    async fn finish_transaction(&self, transaction_id: &TransactionId) -> Result<(), QueueError>;
}

/// The platform product catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Look up products. Unknown ids come back in `invalid_product_ids`.
    async fn fetch_products(&self, product_ids: &BTreeSet<ProductId>) -> RetrieveResults;
}

/// A receipt validation service.
#[async_trait]
pub trait ReceiptValidator: Send + Sync {
    /// Validate raw receipt bytes and return the parsed receipt.
    async fn validate(
        &self,
        receipt_data: &Bytes,
        shared_secret: Option<&str>,
    ) -> Result<ReceiptInfo, ValidatorError>;
}
