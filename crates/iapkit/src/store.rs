//! The Store: unified API for in-app purchases.
//!
//! The Store brings together the payment queue, the product catalog and the
//! receipt validator behind one context object. Purchases and restores are
//! routed through a [`Reconciler`]; receipt questions are answered by the
//! pure functions in `iapkit-core`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use iapkit_core::{
    ProductId, ReceiptError, ReceiptInfo, SubscriptionType, Timestamp, TransactionId,
    VerifyPurchaseResult, VerifySubscriptionResult,
};
use iapkit_queue::{
    PaymentQueue, Product, ProductCatalog, QueueEvent, ReceiptValidator, RetrieveResults,
};
use iapkit_reconcile::{
    CompletionHandler, Purchase, PurchaseRequest, Reconciler, RestoreRequest, RestoreResults,
};

use crate::error::{Result, StoreError};

/// Per-purchase parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOptions {
    pub quantity: u32,
    /// Finish the transaction as soon as it succeeds.
    pub atomically: bool,
    pub application_username: String,
    pub simulates_ask_to_buy: bool,
}

impl Default for PurchaseOptions {
    fn default() -> Self {
        Self {
            quantity: 1,
            atomically: true,
            application_username: String::new(),
            simulates_ask_to_buy: false,
        }
    }
}

/// Configuration for the Store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Options used by [`Store::purchase_product`] and [`Store::restore_purchases`].
    pub purchase: PurchaseOptions,
    /// Shared secret sent to the validator when a call does not supply one.
    pub shared_secret: Option<String>,
    /// Keep retrieved product metadata for later lookups and purchases.
    pub cache_products: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            purchase: PurchaseOptions::default(),
            shared_secret: None,
            cache_products: true,
        }
    }
}

/// The main Store struct.
///
/// Provides a unified API for:
/// - Looking up products
/// - Purchasing and restoring
/// - Finishing transactions
/// - Validating and inspecting receipts
pub struct Store<Q: PaymentQueue, C: ProductCatalog, V: ReceiptValidator> {
    /// Routes queue updates to pending requests.
    reconciler: Arc<Reconciler<Q>>,
    catalog: C,
    validator: V,
    config: StoreConfig,
    /// Product metadata by id.
    products: RwLock<HashMap<ProductId, Product>>,
}

impl<Q: PaymentQueue, C: ProductCatalog, V: ReceiptValidator> Store<Q, C, V> {
    /// Create a new store.
    ///
    /// Queue events are not processed until [`spawn_event_loop`](Self::spawn_event_loop)
    /// is called (or events are fed to [`reconciler`](Self::reconciler) directly).
    pub fn new(queue: Q, catalog: C, validator: V, config: StoreConfig) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(Arc::new(queue))),
            catalog,
            validator,
            config,
            products: RwLock::new(HashMap::new()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the payment queue.
    pub fn queue(&self) -> &Q {
        self.reconciler.queue()
    }

    /// Get the product catalog.
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Get the receipt validator.
    pub fn validator(&self) -> &V {
        &self.validator
    }

    /// Get the reconciler.
    pub fn reconciler(&self) -> &Arc<Reconciler<Q>> {
        &self.reconciler
    }

    /// Process queue events on the Tokio runtime until the stream ends.
    pub fn spawn_event_loop(&self, events: mpsc::UnboundedReceiver<QueueEvent>) -> JoinHandle<()>
    where
        Q: 'static,
    {
        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(async move { reconciler.drive(events).await })
    }

    /// Fail every pending request with a closed-queue error.
    pub fn shutdown(&self) {
        self.reconciler.shutdown();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Products
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the user is allowed to make payments.
    pub async fn can_make_payments(&self) -> bool {
        self.reconciler.queue().can_make_payments().await
    }

    /// Look up product metadata.
    ///
    /// With caching enabled only ids not seen before go to the catalog;
    /// cached products are merged into the result.
    pub async fn retrieve_products_info<I>(&self, product_ids: I) -> RetrieveResults
    where
        I: IntoIterator,
        I::Item: Into<ProductId>,
    {
        let requested: BTreeSet<ProductId> = product_ids.into_iter().map(Into::into).collect();

        let (mut cached, missing) = if self.config.cache_products {
            let products = self.products.read().unwrap_or_else(PoisonError::into_inner);
            let mut cached = Vec::new();
            let mut missing = BTreeSet::new();
            for id in requested {
                match products.get(&id) {
                    Some(product) => cached.push(product.clone()),
                    None => {
                        missing.insert(id);
                    }
                }
            }
            (cached, missing)
        } else {
            (Vec::new(), requested)
        };

        if missing.is_empty() {
            debug!(count = cached.len(), "products served from cache");
            return RetrieveResults {
                retrieved: cached,
                ..Default::default()
            };
        }

        let mut results = self.catalog.fetch_products(&missing).await;
        match &results.error {
            Some(error) => warn!(%error, requested = missing.len(), "product fetch failed"),
            None => debug!(
                retrieved = results.retrieved.len(),
                invalid = results.invalid_product_ids.len(),
                "products fetched"
            ),
        }

        if self.config.cache_products {
            let mut products = self.products.write().unwrap_or_else(PoisonError::into_inner);
            for product in &results.retrieved {
                products.insert(product.product_id.clone(), product.clone());
            }
        }

        cached.append(&mut results.retrieved);
        results.retrieved = cached;
        results
    }

    /// Product metadata retrieved earlier, if cached.
    pub fn cached_product(&self, product_id: &ProductId) -> Option<Product> {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(product_id)
            .cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Purchases
    // ─────────────────────────────────────────────────────────────────────────

    /// Purchase a product with the configured default options.
    pub async fn purchase_product(&self, product_id: impl Into<ProductId>) -> Result<Purchase> {
        self.purchase_product_with(product_id, &self.config.purchase).await
    }

    /// Purchase a product.
    ///
    /// Fails without contacting the payment queue when payments are not
    /// allowed or the product cannot be resolved.
    pub async fn purchase_product_with(
        &self,
        product_id: impl Into<ProductId>,
        options: &PurchaseOptions,
    ) -> Result<Purchase> {
        let product_id = product_id.into();

        if !self.can_make_payments().await {
            info!(%product_id, "purchase refused: payments not allowed");
            return Err(StoreError::PaymentsNotAllowed);
        }

        let product = self.resolve_product(&product_id).await?;
        info!(product_id = %product.product_id, price = %product.price, "starting purchase");

        let request = PurchaseRequest {
            product_id: product.product_id,
            quantity: options.quantity,
            atomically: options.atomically,
            application_username: options.application_username.clone(),
            simulates_ask_to_buy: options.simulates_ask_to_buy,
        };
        Ok(self.reconciler.purchase(request).await?)
    }

    /// Restore completed purchases with the configured default options.
    pub async fn restore_purchases(&self) -> RestoreResults {
        let request = RestoreRequest {
            atomically: self.config.purchase.atomically,
            application_username: self.config.purchase.application_username.clone(),
        };
        self.restore_purchases_with(request).await
    }

    /// Restore completed purchases.
    pub async fn restore_purchases_with(&self, request: RestoreRequest) -> RestoreResults {
        info!(atomically = request.atomically, "starting restore");
        self.reconciler.restore(request).await
    }

    /// Register the handler for transactions no purchase or restore claimed,
    /// such as renewals and purchases interrupted by an app restart.
    ///
    /// Returns `false` if a handler was already registered.
    pub async fn complete_transactions<F>(&self, atomically: bool, handler: F) -> bool
    where
        F: Fn(Vec<Purchase>) + Send + Sync + 'static,
    {
        let handler: CompletionHandler = Arc::new(handler);
        self.reconciler.complete_transactions(atomically, handler).await
    }

    /// Acknowledge a non-atomic purchase or restore.
    pub async fn finish_transaction(&self, transaction_id: &TransactionId) -> Result<()> {
        Ok(self.reconciler.finish_transaction(transaction_id).await?)
    }

    async fn resolve_product(&self, product_id: &ProductId) -> Result<Product> {
        if self.config.cache_products {
            if let Some(product) = self.cached_product(product_id) {
                return Ok(product);
            }
        }

        let mut results = self.retrieve_products_info([product_id.clone()]).await;
        if let Some(error) = results.error.take() {
            return Err(StoreError::ProductFetchFailed(error));
        }
        match results.product(product_id) {
            Some(product) => Ok(product.clone()),
            None => {
                warn!(%product_id, "product not available in catalog");
                Err(StoreError::InvalidProductId(product_id.clone()))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receipts
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate a receipt.
    ///
    /// `shared_secret` overrides the configured one. A response whose status
    /// code marks the receipt invalid is rejected.
    pub async fn verify_receipt(
        &self,
        receipt_data: &Bytes,
        shared_secret: Option<&str>,
    ) -> Result<ReceiptInfo> {
        let secret = shared_secret.or(self.config.shared_secret.as_deref());
        let receipt = self.validator.validate(receipt_data, secret).await?;

        if let Some(status) = receipt.status() {
            if !status.is_valid() {
                warn!(%status, "receipt rejected");
                return Err(ReceiptError::ReceiptInvalid { status }.into());
            }
        }
        debug!(bytes = receipt_data.len(), "receipt validated");
        Ok(receipt)
    }

    /// See [`iapkit_core::verify_purchase`].
    pub fn verify_purchase(&self, product_id: &ProductId, receipt: &ReceiptInfo) -> VerifyPurchaseResult {
        iapkit_core::verify_purchase(product_id, receipt)
    }

    /// See [`iapkit_core::verify_subscription`].
    pub fn verify_subscription(
        &self,
        subscription: SubscriptionType,
        product_id: &ProductId,
        receipt: &ReceiptInfo,
        reference_date: Timestamp,
    ) -> VerifySubscriptionResult {
        iapkit_core::verify_subscription(subscription, product_id, receipt, reference_date)
    }

    /// See [`iapkit_core::verify_subscriptions`].
    pub fn verify_subscriptions(
        &self,
        subscription: SubscriptionType,
        product_ids: &BTreeSet<ProductId>,
        receipt: &ReceiptInfo,
        reference_date: Timestamp,
    ) -> VerifySubscriptionResult {
        iapkit_core::verify_subscriptions(subscription, product_ids, receipt, reference_date)
    }

    /// See [`iapkit_core::distinct_purchase_ids`].
    pub fn distinct_purchase_ids<F>(&self, receipt: &ReceiptInfo, filter: F) -> BTreeSet<ProductId>
    where
        F: Fn(&ProductId) -> bool,
    {
        iapkit_core::distinct_purchase_ids(receipt, filter)
    }
}
