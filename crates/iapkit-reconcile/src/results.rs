//! Request and result types for purchases and restores.

use iapkit_core::{ProductId, Timestamp, TransactionId};
use iapkit_queue::{Payment, QueueError, TransactionState, TransactionUpdate};

use crate::error::TransactionError;

/// A completed purchase or restored purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub product_id: ProductId,
    pub quantity: u32,
    pub transaction_id: TransactionId,
    pub transaction_date: Timestamp,
    pub original_transaction_id: Option<TransactionId>,
    /// The caller still has to finish this transaction.
    pub needs_finish_transaction: bool,
}

impl Purchase {
    fn from_update(update: &TransactionUpdate) -> Self {
        Self {
            product_id: update.product_id.clone(),
            quantity: update.quantity,
            transaction_id: update.transaction_id.clone(),
            transaction_date: update.transaction_date.unwrap_or_else(Timestamp::now),
            original_transaction_id: update.original_transaction_id.clone(),
            needs_finish_transaction: true,
        }
    }
}

/// Classification of one terminal queue update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResult {
    Purchased(Purchase),
    Failed(QueueError),
    Restored(Purchase),
}

impl TransactionResult {
    /// Classify an update. Non-terminal states yield `None`.
    pub fn classify(update: &TransactionUpdate) -> Option<Self> {
        match &update.state {
            TransactionState::Purchased => Some(Self::Purchased(Purchase::from_update(update))),
            TransactionState::Restored => Some(Self::Restored(Purchase::from_update(update))),
            TransactionState::Failed(error) => Some(Self::Failed(error.clone())),
            TransactionState::Purchasing | TransactionState::Deferred => None,
        }
    }
}

/// Outcome of a purchase request.
pub type PurchaseResult = std::result::Result<Purchase, TransactionError>;

/// A restore entry that could not be delivered as a restored purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    pub error: TransactionError,
    /// Set when the failing transaction identified its product.
    pub product_id: Option<ProductId>,
}

/// Outcome of a restore request, delivered only once the batch is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreResults {
    pub restored_purchases: Vec<Purchase>,
    pub restore_failed_purchases: Vec<RestoreFailure>,
}

impl RestoreResults {
    pub(crate) fn failed(error: TransactionError) -> Self {
        Self {
            restored_purchases: Vec::new(),
            restore_failed_purchases: vec![RestoreFailure {
                error,
                product_id: None,
            }],
        }
    }
}

/// Parameters of a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Finish the transaction as soon as it succeeds.
    pub atomically: bool,
    pub application_username: String,
    pub simulates_ask_to_buy: bool,
}

impl PurchaseRequest {
    /// A single, atomic purchase of `product_id`.
    pub fn new(product_id: impl Into<ProductId>) -> Self {
        Self {
            product_id: product_id.into(),
            quantity: 1,
            atomically: true,
            application_username: String::new(),
            simulates_ask_to_buy: false,
        }
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn atomically(mut self, atomically: bool) -> Self {
        self.atomically = atomically;
        self
    }

    pub fn application_username(mut self, username: impl Into<String>) -> Self {
        self.application_username = username.into();
        self
    }

    pub(crate) fn to_payment(&self) -> Payment {
        Payment {
            product_id: self.product_id.clone(),
            quantity: self.quantity,
            application_username: self.application_username.clone(),
            simulates_ask_to_buy: self.simulates_ask_to_buy,
        }
    }
}

/// Parameters of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Finish restored transactions as they arrive.
    pub atomically: bool,
    pub application_username: String,
}

impl Default for RestoreRequest {
    fn default() -> Self {
        Self {
            atomically: true,
            application_username: String::new(),
        }
    }
}
