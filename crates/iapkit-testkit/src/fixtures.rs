//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

use iapkit::{Store, StoreConfig};
use iapkit_core::{ProductId, ReceiptInfo, Timestamp, TransactionId};
use iapkit_queue::{MemoryCatalog, MemoryPaymentQueue, Product, StaticValidator};

/// The store type wired to in-memory collaborators.
pub type MemoryStore = Store<MemoryPaymentQueue, MemoryCatalog, StaticValidator>;

// ─────────────────────────────────────────────────────────────────────────────
// Receipt JSON
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for one purchase record, in the validation server's format.
///
/// Dates are written as `*_date_ms` strings, the way the server sends them.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    product_id: ProductId,
    transaction_id: TransactionId,
    original_transaction_id: Option<TransactionId>,
    quantity: u32,
    purchase_date: Timestamp,
    expires_date: Option<Timestamp>,
    cancellation_date: Option<Timestamp>,
    is_trial_period: bool,
}

impl RecordBuilder {
    pub fn new(
        product_id: impl Into<ProductId>,
        transaction_id: impl Into<TransactionId>,
        purchase_date: Timestamp,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            transaction_id: transaction_id.into(),
            original_transaction_id: None,
            quantity: 1,
            purchase_date,
            expires_date: None,
            cancellation_date: None,
            is_trial_period: false,
        }
    }

    pub fn original_transaction_id(mut self, id: impl Into<TransactionId>) -> Self {
        self.original_transaction_id = Some(id.into());
        self
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn expires(mut self, date: Timestamp) -> Self {
        self.expires_date = Some(date);
        self
    }

    pub fn cancelled(mut self, date: Timestamp) -> Self {
        self.cancellation_date = Some(date);
        self
    }

    pub fn trial(mut self) -> Self {
        self.is_trial_period = true;
        self
    }

    pub fn to_json(&self) -> Value {
        let original = self
            .original_transaction_id
            .as_ref()
            .unwrap_or(&self.transaction_id);

        let mut record = Map::new();
        record.insert("product_id".into(), json!(self.product_id.as_str()));
        record.insert("transaction_id".into(), json!(self.transaction_id.as_str()));
        record.insert("original_transaction_id".into(), json!(original.as_str()));
        record.insert("quantity".into(), json!(self.quantity.to_string()));
        record.insert(
            "purchase_date_ms".into(),
            json!(self.purchase_date.as_millis().to_string()),
        );
        record.insert(
            "original_purchase_date_ms".into(),
            json!(self.purchase_date.as_millis().to_string()),
        );
        if let Some(expires) = self.expires_date {
            record.insert("expires_date_ms".into(), json!(expires.as_millis().to_string()));
        }
        if let Some(cancelled) = self.cancellation_date {
            record.insert(
                "cancellation_date_ms".into(),
                json!(cancelled.as_millis().to_string()),
            );
        }
        record.insert("is_trial_period".into(), json!(self.is_trial_period.to_string()));
        Value::Object(record)
    }
}

/// Builder for a validation server response.
#[derive(Debug, Clone, Default)]
pub struct ReceiptBuilder {
    status: i64,
    in_app: Vec<RecordBuilder>,
    latest_receipt_info: Option<Vec<RecordBuilder>>,
}

impl ReceiptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response status code. Defaults to 0 (valid).
    pub fn status(mut self, status: i64) -> Self {
        self.status = status;
        self
    }

    /// Add a record to `receipt.in_app`.
    pub fn in_app(mut self, record: RecordBuilder) -> Self {
        self.in_app.push(record);
        self
    }

    /// Add a record to `latest_receipt_info`.
    pub fn latest(mut self, record: RecordBuilder) -> Self {
        self.latest_receipt_info.get_or_insert_with(Vec::new).push(record);
        self
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.to_map())
    }

    /// Serialized response body, as a validator would receive it.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    /// Build the receipt without status checks.
    pub fn build(&self) -> ReceiptInfo {
        ReceiptInfo::new(self.to_map())
    }

    fn to_map(&self) -> Map<String, Value> {
        let in_app: Vec<Value> = self.in_app.iter().map(RecordBuilder::to_json).collect();

        let mut response = Map::new();
        response.insert("status".into(), json!(self.status));
        response.insert("receipt".into(), json!({ "in_app": in_app }));
        if let Some(latest) = &self.latest_receipt_info {
            response.insert(
                "latest_receipt_info".into(),
                Value::Array(latest.iter().map(RecordBuilder::to_json).collect()),
            );
        }
        response
    }

    /// A validator that answers every request with this receipt.
    pub fn validator(&self) -> StaticValidator {
        StaticValidator::from_response(self.to_json())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store harness
// ─────────────────────────────────────────────────────────────────────────────

/// Products every harness catalog knows about.
pub fn default_products() -> Vec<Product> {
    vec![
        Product::new("com.example.coins", "0.99"),
        Product::new("com.example.pro", "4.99"),
        Product {
            subscription_period: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            ..Product::new("com.example.monthly", "2.99")
        },
    ]
}

/// A store wired to in-memory collaborators with its event loop running.
///
/// Must be created inside a Tokio runtime.
pub struct TestHarness {
    pub store: MemoryStore,
    event_loop: JoinHandle<()>,
}

impl TestHarness {
    /// Harness with [`default_products`], an empty valid receipt and the
    /// default configuration.
    pub fn new() -> Self {
        Self::with_config(default_products(), ReceiptBuilder::new().validator(), StoreConfig::default())
    }

    pub fn with_config(
        products: impl IntoIterator<Item = Product>,
        validator: StaticValidator,
        config: StoreConfig,
    ) -> Self {
        let (queue, events) = MemoryPaymentQueue::new();
        let store = Store::new(queue, MemoryCatalog::new(products), validator, config);
        let event_loop = store.spawn_event_loop(events);
        Self { store, event_loop }
    }

    pub fn queue(&self) -> &MemoryPaymentQueue {
        self.store.queue()
    }

    /// Wait until `count` payments have reached the queue.
    pub async fn wait_for_payments(&self, count: usize) -> anyhow::Result<()> {
        self.wait_until(|| self.queue().payments().len() >= count)
            .await
            .with_context(|| format!("waiting for {count} payments"))
    }

    /// Wait until `count` restores have reached the queue.
    pub async fn wait_for_restores(&self, count: usize) -> anyhow::Result<()> {
        self.wait_until(|| self.queue().restore_requests().len() >= count)
            .await
            .with_context(|| format!("waiting for {count} restores"))
    }

    /// Wait until the transaction has been finished on the queue.
    pub async fn wait_for_finish(&self, transaction_id: &TransactionId) -> anyhow::Result<()> {
        self.wait_until(|| self.queue().is_finished(transaction_id))
            .await
            .with_context(|| format!("waiting for {transaction_id} to finish"))
    }

    /// Close the queue and wait for the event loop to exit.
    pub async fn close(self) -> anyhow::Result<()> {
        self.queue().close();
        self.event_loop.await.context("event loop panicked")
    }

    async fn wait_until(&self, condition: impl Fn() -> bool) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            if tokio::time::Instant::now() >= deadline {
                bail!("timed out");
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iapkit_core::{verify_purchase, ReceiptStatus};

    #[test]
    fn test_record_builder_round_trips_through_parser() {
        let receipt = ReceiptBuilder::new()
            .in_app(
                RecordBuilder::new("a", "10", Timestamp::from_millis(1000))
                    .quantity(2)
                    .original_transaction_id("5"),
            )
            .build();

        let items = receipt.in_app_purchases();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].original_transaction_id, TransactionId::from("5"));
        assert!(verify_purchase(&ProductId::from("a"), &receipt).is_purchased());
    }

    #[test]
    fn test_latest_receipt_info_present_only_when_added() {
        assert!(ReceiptBuilder::new().to_json().get("latest_receipt_info").is_none());

        let receipt = ReceiptBuilder::new()
            .latest(RecordBuilder::new("m", "1", Timestamp::from_millis(0)).expires(Timestamp::from_millis(10)))
            .build();
        assert_eq!(receipt.latest_receipt_info().len(), 1);
        assert_eq!(receipt.status(), Some(ReceiptStatus::Valid));
    }

    #[tokio::test]
    async fn test_harness_close_stops_event_loop() {
        let harness = TestHarness::new();
        assert!(harness.store.can_make_payments().await);
        harness.close().await.unwrap();
    }
}
