//! In-memory implementations of the collaborator traits.
//!
//! These are primarily for testing and local simulation. The payment queue
//! has the same observable semantics as a platform queue: calls are recorded,
//! outcomes are delivered later as events, and finishing is idempotent.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use iapkit_core::{ProductId, ReceiptInfo, Timestamp, TransactionId};

use crate::error::{CatalogError, QueueError, ValidatorError};
use crate::events::{Payment, Product, QueueEvent, RetrieveResults, TransactionState, TransactionUpdate};
use crate::traits::{PaymentQueue, ProductCatalog, ReceiptValidator};

// ─────────────────────────────────────────────────────────────────────────────
// Payment queue
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory payment queue.
///
/// Events pushed with [`emit`](Self::emit) come out of the receiver returned
/// by [`new`](Self::new). Thread-safe via RwLock.
pub struct MemoryPaymentQueue {
    inner: RwLock<MemoryQueueInner>,
}

struct MemoryQueueInner {
    /// Event channel; `None` once closed.
    events: Option<mpsc::UnboundedSender<QueueEvent>>,

    can_make_payments: bool,

    /// Every payment accepted by `add_payment`.
    payments: Vec<Payment>,

    /// Application usernames passed to each restore.
    restore_requests: Vec<String>,

    /// Every `finish_transaction` call, duplicates included.
    finish_calls: Vec<TransactionId>,

    /// Terminal transactions that have not been finished yet.
    unfinished: HashMap<TransactionId, TransactionUpdate>,

    finished: HashSet<TransactionId>,

    /// Error returned by the next `add_payment` or restore call.
    next_failure: Option<QueueError>,

    next_transaction: u64,
}

impl MemoryPaymentQueue {
    /// Create a queue and the receiver its events are delivered on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            inner: RwLock::new(MemoryQueueInner {
                events: Some(tx),
                can_make_payments: true,
                payments: Vec::new(),
                restore_requests: Vec::new(),
                finish_calls: Vec::new(),
                unfinished: HashMap::new(),
                finished: HashSet::new(),
                next_failure: None,
                next_transaction: rand::thread_rng().gen_range(1_000_000_000_000..9_000_000_000_000),
            }),
        };
        (queue, rx)
    }

    /// Toggle whether payments are allowed.
    pub fn set_can_make_payments(&self, allowed: bool) {
        self.inner.write().unwrap().can_make_payments = allowed;
    }

    /// Make the next `add_payment` or restore call fail.
    pub fn fail_next_call(&self, error: QueueError) {
        self.inner.write().unwrap().next_failure = Some(error);
    }

    /// Payments submitted so far.
    pub fn payments(&self) -> Vec<Payment> {
        self.inner.read().unwrap().payments.clone()
    }

    /// Application usernames of restores requested so far.
    pub fn restore_requests(&self) -> Vec<String> {
        self.inner.read().unwrap().restore_requests.clone()
    }

    /// Every finish call received, in order.
    pub fn finish_calls(&self) -> Vec<TransactionId> {
        self.inner.read().unwrap().finish_calls.clone()
    }

    /// Whether a transaction has been finished.
    pub fn is_finished(&self, transaction_id: &TransactionId) -> bool {
        self.inner.read().unwrap().finished.contains(transaction_id)
    }

    /// Terminal transactions still waiting for a finish.
    pub fn unfinished_transactions(&self) -> Vec<TransactionUpdate> {
        let inner = self.inner.read().unwrap();
        let mut updates: Vec<_> = inner.unfinished.values().cloned().collect();
        updates.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));
        updates
    }

    /// Build an update for `product_id` with a fresh transaction id.
    pub fn update(&self, product_id: impl Into<ProductId>, state: TransactionState) -> TransactionUpdate {
        let mut inner = self.inner.write().unwrap();
        let id = inner.next_transaction;
        inner.next_transaction += 1;

        TransactionUpdate {
            transaction_id: TransactionId::new(id.to_string()),
            product_id: product_id.into(),
            quantity: 1,
            state,
            transaction_date: Some(Timestamp::now()),
            original_transaction_id: None,
        }
    }

    /// Build a restored update pointing at `original`.
    pub fn restored(&self, product_id: impl Into<ProductId>, original: &TransactionId) -> TransactionUpdate {
        let mut update = self.update(product_id, TransactionState::Restored);
        update.original_transaction_id = Some(original.clone());
        update
    }

    /// Build and deliver a single update.
    pub fn complete(&self, product_id: impl Into<ProductId>, state: TransactionState) -> TransactionUpdate {
        let update = self.update(product_id, state);
        self.emit(QueueEvent::Updated(vec![update.clone()]));
        update
    }

    /// Deliver an event.
    ///
    /// Events sent after [`close`](Self::close) are dropped.
    pub fn emit(&self, event: QueueEvent) {
        let mut inner = self.inner.write().unwrap();

        if let QueueEvent::Updated(updates) = &event {
            for update in updates.iter().filter(|u| u.state.is_terminal()) {
                if !inner.finished.contains(&update.transaction_id) {
                    inner
                        .unfinished
                        .insert(update.transaction_id.clone(), update.clone());
                }
            }
        }

        match &inner.events {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("event receiver dropped, event discarded");
                }
            }
            None => debug!("queue closed, event discarded"),
        }
    }

    /// Stop delivering events. The receiver sees end-of-stream.
    pub fn close(&self) {
        self.inner.write().unwrap().events = None;
    }
}

#[async_trait]
impl PaymentQueue for MemoryPaymentQueue {
    async fn can_make_payments(&self) -> bool {
        self.inner.read().unwrap().can_make_payments
    }

    async fn add_payment(&self, payment: &Payment) -> Result<(), QueueError> {
        let mut inner = self.inner.write().unwrap();
        if let Some(error) = inner.next_failure.take() {
            debug!(%error, product_id = %payment.product_id, "add_payment failing on request");
            return Err(error);
        }
        inner.payments.push(payment.clone());
        Ok(())
    }

    async fn restore_completed_transactions(&self, application_username: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.write().unwrap();
        if let Some(error) = inner.next_failure.take() {
            debug!(%error, "restore_completed_transactions failing on request");
            return Err(error);
        }
        inner.restore_requests.push(application_username.to_string());
        Ok(())
    }

    async fn finish_transaction(&self, transaction_id: &TransactionId) -> Result<(), QueueError> {
        let mut inner = self.inner.write().unwrap();
        inner.finish_calls.push(transaction_id.clone());
        inner.unfinished.remove(transaction_id);
        inner.finished.insert(transaction_id.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Product catalog
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory product catalog.
pub struct MemoryCatalog {
    inner: RwLock<MemoryCatalogInner>,
}

struct MemoryCatalogInner {
    products: HashMap<ProductId, Product>,
    failure: Option<CatalogError>,
    fetch_count: usize,
}

impl MemoryCatalog {
    /// Create a catalog holding `products`.
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            inner: RwLock::new(MemoryCatalogInner {
                products: products
                    .into_iter()
                    .map(|p| (p.product_id.clone(), p))
                    .collect(),
                failure: None,
                fetch_count: 0,
            }),
        }
    }

    /// Make every subsequent fetch fail (or succeed again with `None`).
    pub fn set_failure(&self, failure: Option<CatalogError>) {
        self.inner.write().unwrap().failure = failure;
    }

    /// Number of fetches served.
    pub fn fetch_count(&self) -> usize {
        self.inner.read().unwrap().fetch_count
    }
}

#[async_trait]
impl ProductCatalog for MemoryCatalog {
    async fn fetch_products(&self, product_ids: &BTreeSet<ProductId>) -> RetrieveResults {
        let mut inner = self.inner.write().unwrap();
        inner.fetch_count += 1;

        if let Some(error) = &inner.failure {
            return RetrieveResults {
                error: Some(error.clone()),
                ..RetrieveResults::default()
            };
        }

        let mut results = RetrieveResults::default();
        for id in product_ids {
            match inner.products.get(id) {
                Some(product) => results.retrieved.push(product.clone()),
                None => {
                    results.invalid_product_ids.insert(id.clone());
                }
            }
        }
        results
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Receipt validator
// ─────────────────────────────────────────────────────────────────────────────

/// Validator that returns a fixed outcome for any non-empty receipt.
pub struct StaticValidator {
    outcome: Result<ReceiptInfo, ValidatorError>,
    secrets: RwLock<Vec<Option<String>>>,
}

impl StaticValidator {
    /// Always return `outcome`.
    pub fn new(outcome: Result<ReceiptInfo, ValidatorError>) -> Self {
        Self {
            outcome,
            secrets: RwLock::new(Vec::new()),
        }
    }

    /// Treat `response` as a validation server response body.
    pub fn from_response(response: Value) -> Self {
        Self::new(ReceiptInfo::from_response(response).map_err(ValidatorError::from))
    }

    /// Shared secrets passed to each `validate` call.
    pub fn secrets(&self) -> Vec<Option<String>> {
        self.secrets.read().unwrap().clone()
    }
}

#[async_trait]
impl ReceiptValidator for StaticValidator {
    async fn validate(
        &self,
        receipt_data: &Bytes,
        shared_secret: Option<&str>,
    ) -> Result<ReceiptInfo, ValidatorError> {
        if receipt_data.is_empty() {
            return Err(ValidatorError::NoReceiptData);
        }
        self.secrets
            .write()
            .unwrap()
            .push(shared_secret.map(String::from));
        self.outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iapkit_core::{ReceiptError, ReceiptStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_delivers_and_tracks_unfinished() {
        let (queue, mut rx) = MemoryPaymentQueue::new();

        let update = queue.complete("a", TransactionState::Purchased);
        let event = rx.recv().await.unwrap();
        assert_eq!(event, QueueEvent::Updated(vec![update.clone()]));
        assert_eq!(queue.unfinished_transactions(), vec![update.clone()]);

        queue.finish_transaction(&update.transaction_id).await.unwrap();
        assert!(queue.unfinished_transactions().is_empty());
        assert!(queue.is_finished(&update.transaction_id));
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let (queue, _rx) = MemoryPaymentQueue::new();
        let id = TransactionId::from("1");

        queue.finish_transaction(&id).await.unwrap();
        queue.finish_transaction(&id).await.unwrap();
        assert_eq!(queue.finish_calls().len(), 2);
        assert!(queue.is_finished(&id));
    }

    #[tokio::test]
    async fn test_non_terminal_updates_not_tracked() {
        let (queue, _rx) = MemoryPaymentQueue::new();
        queue.complete("a", TransactionState::Purchasing);
        queue.complete("a", TransactionState::Deferred);
        assert!(queue.unfinished_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_fail_next_call_applies_once() {
        let (queue, _rx) = MemoryPaymentQueue::new();
        let payment = Payment {
            product_id: ProductId::from("a"),
            quantity: 1,
            application_username: String::new(),
            simulates_ask_to_buy: false,
        };

        queue.fail_next_call(QueueError::Network("offline".into()));
        assert!(queue.add_payment(&payment).await.is_err());
        assert!(queue.add_payment(&payment).await.is_ok());
        assert_eq!(queue.payments().len(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let (queue, mut rx) = MemoryPaymentQueue::new();
        queue.close();
        queue.emit(QueueEvent::RestoreFinished);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_emit_without_receiver_still_tracks_unfinished() {
        let (queue, rx) = MemoryPaymentQueue::new();
        drop(rx);
        let update = queue.complete("a", TransactionState::Purchased);
        assert_eq!(queue.unfinished_transactions().len(), 1);
        assert_eq!(queue.unfinished_transactions()[0].transaction_id, update.transaction_id);
    }

    #[tokio::test]
    async fn test_transaction_ids_are_unique() {
        let (queue, _rx) = MemoryPaymentQueue::new();
        let a = queue.update("a", TransactionState::Purchased);
        let b = queue.update("a", TransactionState::Purchased);
        assert_ne!(a.transaction_id, b.transaction_id);
    }

    #[tokio::test]
    async fn test_catalog_partitions_ids() {
        let catalog = MemoryCatalog::new([Product::new("a", "0.99")]);
        let ids: BTreeSet<ProductId> = ["a", "b"].into_iter().map(ProductId::from).collect();

        let results = catalog.fetch_products(&ids).await;
        assert_eq!(results.retrieved.len(), 1);
        assert!(results.invalid_product_ids.contains(&ProductId::from("b")));
        assert!(results.error.is_none());
        assert_eq!(catalog.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_catalog_failure() {
        let catalog = MemoryCatalog::new([Product::new("a", "0.99")]);
        catalog.set_failure(Some(CatalogError::Network("offline".into())));
        let ids: BTreeSet<ProductId> = [ProductId::from("a")].into_iter().collect();

        let results = catalog.fetch_products(&ids).await;
        assert!(results.retrieved.is_empty());
        assert_eq!(results.error, Some(CatalogError::Network("offline".into())));
    }

    #[tokio::test]
    async fn test_static_validator() {
        let validator = StaticValidator::from_response(json!({ "status": 0, "receipt": {} }));
        let info = validator
            .validate(&Bytes::from_static(b"receipt"), Some("secret"))
            .await
            .unwrap();
        assert_eq!(info.status(), Some(ReceiptStatus::Valid));
        assert_eq!(validator.secrets(), vec![Some("secret".to_string())]);

        let empty = validator.validate(&Bytes::new(), None).await;
        assert_eq!(empty, Err(ValidatorError::NoReceiptData));
    }

    #[tokio::test]
    async fn test_static_validator_rejected_status() {
        let validator = StaticValidator::from_response(json!({ "status": 21003 }));
        let result = validator.validate(&Bytes::from_static(b"receipt"), None).await;
        assert_eq!(
            result,
            Err(ValidatorError::Receipt(ReceiptError::ReceiptInvalid {
                status: ReceiptStatus::ReceiptCouldNotBeAuthenticated
            }))
        );
    }
}
