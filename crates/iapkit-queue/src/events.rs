//! Payment queue message types.
//!
//! These are what flows between iapkit and the platform: payments going in,
//! transaction updates and restore signals coming back out.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use iapkit_core::{ProductId, Timestamp, TransactionId};

use crate::error::{CatalogError, QueueError};

/// Product metadata as reported by the catalog.
///
/// Opaque beyond `product_id` to the reconciliation logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub localized_title: String,
    pub localized_description: String,
    /// Decimal price string in the storefront currency, e.g. `"4.99"`.
    pub price: String,
    /// ISO 4217 currency code.
    pub currency_code: String,
    /// Billing period for subscription products.
    pub subscription_period: Option<Duration>,
}

impl Product {
    /// Minimal product with only an id and a price.
    pub fn new(product_id: impl Into<ProductId>, price: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            localized_title: String::new(),
            localized_description: String::new(),
            price: price.into(),
            currency_code: "USD".to_string(),
            subscription_period: None,
        }
    }
}

/// Result of a catalog lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveResults {
    pub retrieved: Vec<Product>,
    pub invalid_product_ids: BTreeSet<ProductId>,
    pub error: Option<CatalogError>,
}

impl RetrieveResults {
    /// Find a retrieved product by id.
    pub fn product(&self, product_id: &ProductId) -> Option<&Product> {
        self.retrieved.iter().find(|p| &p.product_id == product_id)
    }
}

/// A payment submitted to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub product_id: ProductId,
    pub quantity: u32,
    pub application_username: String,
    /// Ask the sandbox to simulate a parental-approval (deferred) flow.
    pub simulates_ask_to_buy: bool,
}

/// State of one transaction, as reported by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    /// Being processed; not terminal.
    Purchasing,
    /// Charged successfully.
    Purchased,
    /// Failed with the given reason.
    Failed(QueueError),
    /// A previously completed purchase, re-delivered by a restore.
    Restored,
    /// Awaiting external approval; not terminal.
    Deferred,
}

impl TransactionState {
    /// Whether the state ends the transaction's life in the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Purchased | Self::Failed(_) | Self::Restored)
    }
}

/// One transaction update delivered by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionUpdate {
    pub transaction_id: TransactionId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub state: TransactionState,
    pub transaction_date: Option<Timestamp>,
    /// Set for restored transactions: the id of the purchase being restored.
    pub original_transaction_id: Option<TransactionId>,
}

/// Everything the queue reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A batch of transaction updates.
    Updated(Vec<TransactionUpdate>),
    /// All transactions of the current restore have been delivered.
    RestoreFinished,
    /// The current restore failed.
    RestoreFailed(QueueError),
}
