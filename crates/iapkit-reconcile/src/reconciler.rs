//! Reconciler state machine.
//!
//! Each pending request owns a `oneshot` resolver. A resolver is removed from
//! the table under the lock before it is used, so a request can never resolve
//! twice, and a terminal transaction id is recorded the first time it is seen
//! so a redelivered update cannot claim a second request. Both id sets keep
//! only the most recent [`RECENT_TRANSACTION_CAPACITY`] entries.
//!
//! A request whose caller has gone away is skipped when its product's queue
//! is popped. An update that still lands on a dropped caller is handed to the
//! completion path like any other unclaimed transaction.
//!
//! Event handling happens in two steps: classify under the lock into a list
//! of effects, then run the effects (finishes, resolutions, handler calls)
//! with the lock released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use iapkit_core::{ProductId, TransactionId};
use iapkit_queue::{PaymentQueue, QueueError, QueueEvent, TransactionUpdate};

use crate::error::{Result, TransactionError};
use crate::results::{
    Purchase, PurchaseRequest, PurchaseResult, RestoreFailure, RestoreRequest, RestoreResults,
    TransactionResult,
};

/// Receives transactions no pending request claimed.
pub type CompletionHandler = Arc<dyn Fn(Vec<Purchase>) + Send + Sync>;

/// Number of transaction ids remembered for duplicate and finish checks.
pub const RECENT_TRANSACTION_CAPACITY: usize = 4096;

/// Identity of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tracks pending requests and resolves them from queue events.
pub struct Reconciler<Q: PaymentQueue> {
    queue: Arc<Q>,
    state: Mutex<ReconcilerState>,
}

struct ReconcilerState {
    next_request_id: u64,

    /// Pending purchases per product, oldest first.
    purchases: HashMap<ProductId, VecDeque<PendingPurchase>>,

    /// Pending restores, oldest first. Only the front one collects updates.
    restores: VecDeque<PendingRestore>,

    completion: Option<CompletionRegistration>,

    /// Unclaimed purchases held until a completion handler registers.
    unclaimed: Vec<Purchase>,

    /// Terminal transactions already routed.
    seen: RecentIds<TransactionId>,

    /// Transactions already finished through this reconciler.
    finished: RecentIds<TransactionId>,

    /// Set once the event stream has ended.
    closed: bool,
}

struct PendingPurchase {
    request_id: RequestId,
    atomically: bool,
    resolver: oneshot::Sender<PurchaseResult>,
}

struct PendingRestore {
    request_id: RequestId,
    atomically: bool,
    resolver: oneshot::Sender<RestoreResults>,
    results: RestoreResults,
}

struct CompletionRegistration {
    atomically: bool,
    handler: CompletionHandler,
}

/// Work produced by classification, run after the lock is released.
enum Effect {
    Finish(TransactionId),
    ResolvePurchase {
        request_id: RequestId,
        resolver: oneshot::Sender<PurchaseResult>,
        result: PurchaseResult,
    },
    ResolveRestore {
        request_id: RequestId,
        resolver: oneshot::Sender<RestoreResults>,
        results: RestoreResults,
    },
    Deliver {
        handler: CompletionHandler,
        purchases: Vec<Purchase>,
    },
}

impl<Q: PaymentQueue> Reconciler<Q> {
    /// Create a reconciler over `queue`.
    pub fn new(queue: Arc<Q>) -> Self {
        Self {
            queue,
            state: Mutex::new(ReconcilerState {
                next_request_id: 1,
                purchases: HashMap::new(),
                restores: VecDeque::new(),
                completion: None,
                unclaimed: Vec::new(),
                seen: RecentIds::new(RECENT_TRANSACTION_CAPACITY),
                finished: RecentIds::new(RECENT_TRANSACTION_CAPACITY),
                closed: false,
            }),
        }
    }

    /// The queue this reconciler drives.
    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    fn lock(&self) -> MutexGuard<'_, ReconcilerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Submit a payment and wait for its terminal update.
    ///
    /// A second purchase of a product that is already pending waits behind
    /// the first: terminal updates for a product resolve its requests in
    /// submission order.
    pub async fn purchase(&self, request: PurchaseRequest) -> PurchaseResult {
        let (resolver, outcome) = oneshot::channel();

        let registered = self.lock().register_purchase(&request, resolver);
        let Some(request_id) = registered else {
            return Err(QueueError::Closed.into());
        };
        debug!(%request_id, product_id = %request.product_id, "purchase registered");

        if let Err(error) = self.queue.add_payment(&request.to_payment()).await {
            warn!(%request_id, %error, "add_payment failed");
            let pending = self.lock().take_purchase(&request.product_id, request_id);
            if let Some(pending) = pending {
                let _ = pending.resolver.send(Err(error.into()));
            }
        }

        outcome.await.unwrap_or(Err(QueueError::Closed.into()))
    }

    /// Ask the queue to restore completed transactions and wait for the batch.
    pub async fn restore(&self, request: RestoreRequest) -> RestoreResults {
        let (resolver, outcome) = oneshot::channel();

        let registered = self.lock().register_restore(&request, resolver);
        let Some(request_id) = registered else {
            return RestoreResults::failed(QueueError::Closed.into());
        };
        debug!(%request_id, "restore registered");

        if let Err(error) = self
            .queue
            .restore_completed_transactions(&request.application_username)
            .await
        {
            warn!(%request_id, %error, "restore_completed_transactions failed");
            let pending = self.lock().take_restore(request_id);
            if let Some(mut pending) = pending {
                pending.results.restore_failed_purchases.push(RestoreFailure {
                    error: error.into(),
                    product_id: None,
                });
                let _ = pending.resolver.send(pending.results);
            }
        }

        outcome
            .await
            .unwrap_or_else(|_| RestoreResults::failed(QueueError::Closed.into()))
    }

    /// Register the handler for transactions no request claims.
    ///
    /// Only the first registration takes effect; later calls return `false`.
    /// Transactions that arrived before registration are delivered now.
    pub async fn complete_transactions(&self, atomically: bool, handler: CompletionHandler) -> bool {
        let held = {
            let mut state = self.lock();
            if state.completion.is_some() {
                warn!("completion handler already registered, ignoring");
                return false;
            }
            state.completion = Some(CompletionRegistration {
                atomically,
                handler: Arc::clone(&handler),
            });
            std::mem::take(&mut state.unclaimed)
        };

        if !held.is_empty() {
            info!(count = held.len(), "delivering transactions held before registration");
            self.deliver_unclaimed(atomically, handler, held).await;
        }
        true
    }

    /// Acknowledge a transaction.
    ///
    /// Repeated calls for the same transaction are no-ops.
    pub async fn finish_transaction(&self, transaction_id: &TransactionId) -> Result<()> {
        if !self.lock().finished.insert(transaction_id.clone()) {
            debug!(%transaction_id, "transaction already finished");
            return Ok(());
        }

        if let Err(error) = self.queue.finish_transaction(transaction_id).await {
            self.lock().finished.remove(transaction_id);
            return Err(error.into());
        }
        debug!(%transaction_id, "transaction finished");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Process queue events until the stream ends, then fail whatever is
    /// still pending with [`QueueError::Closed`].
    pub async fn drive(&self, mut events: mpsc::UnboundedReceiver<QueueEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("payment queue event stream ended");
        self.shutdown();
    }

    /// Process a single queue event.
    pub async fn handle_event(&self, event: QueueEvent) {
        let effects = self.lock().apply(event);
        self.run_effects(effects).await;
    }

    /// Run classified effects. Purchases whose caller went away are routed
    /// as unclaimed once the batch is done.
    async fn run_effects(&self, effects: Vec<Effect>) {
        let mut orphaned = Vec::new();
        for effect in effects {
            if let Some(purchase) = self.run(effect).await {
                orphaned.push(purchase);
            }
        }
        if orphaned.is_empty() {
            return;
        }

        let mut effects = Vec::new();
        self.lock().dispatch_unclaimed(orphaned, &mut effects);
        for effect in effects {
            self.run(effect).await;
        }
    }

    /// Fail every pending request and refuse new ones.
    pub fn shutdown(&self) {
        let (purchases, restores) = {
            let mut state = self.lock();
            state.closed = true;
            let purchases: Vec<PendingPurchase> =
                state.purchases.drain().flat_map(|(_, queue)| queue).collect();
            let restores: Vec<PendingRestore> = state.restores.drain(..).collect();
            (purchases, restores)
        };

        for pending in purchases {
            debug!(request_id = %pending.request_id, "purchase failed: queue closed");
            let _ = pending.resolver.send(Err(QueueError::Closed.into()));
        }
        for mut pending in restores {
            debug!(request_id = %pending.request_id, "restore failed: queue closed");
            pending.results.restore_failed_purchases.push(RestoreFailure {
                error: QueueError::Closed.into(),
                product_id: None,
            });
            let _ = pending.resolver.send(pending.results);
        }
    }

    /// Number of purchases waiting for an update whose caller is still there.
    pub fn pending_purchases(&self) -> usize {
        self.lock()
            .purchases
            .values()
            .flatten()
            .filter(|pending| !pending.resolver.is_closed())
            .count()
    }

    /// Number of restores waiting for their batch.
    pub fn pending_restores(&self) -> usize {
        self.lock().restores.len()
    }

    /// Run one effect. Returns the purchase when its caller went away before
    /// it could be resolved.
    async fn run(&self, effect: Effect) -> Option<Purchase> {
        match effect {
            Effect::Finish(transaction_id) => self.finish_logged(&transaction_id).await,
            Effect::ResolvePurchase {
                request_id,
                resolver,
                result,
            } => {
                if let Ok(purchase) = &result {
                    if !purchase.needs_finish_transaction {
                        self.finish_logged(&purchase.transaction_id).await;
                    }
                }
                debug!(%request_id, ok = result.is_ok(), "purchase resolved");
                match resolver.send(result) {
                    Ok(()) => {}
                    Err(Ok(purchase)) => {
                        warn!(
                            %request_id,
                            transaction_id = %purchase.transaction_id,
                            "purchase caller went away, handing transaction to completion path"
                        );
                        return Some(purchase);
                    }
                    Err(Err(_)) => debug!(%request_id, "purchase caller went away"),
                }
            }
            Effect::ResolveRestore {
                request_id,
                resolver,
                results,
            } => {
                info!(
                    %request_id,
                    restored = results.restored_purchases.len(),
                    failed = results.restore_failed_purchases.len(),
                    "restore resolved"
                );
                if resolver.send(results).is_err() {
                    debug!(%request_id, "restore caller went away");
                }
            }
            Effect::Deliver { handler, purchases } => handler(purchases),
        }
        None
    }

    async fn deliver_unclaimed(&self, atomically: bool, handler: CompletionHandler, mut purchases: Vec<Purchase>) {
        if atomically {
            for purchase in &mut purchases {
                self.finish_logged(&purchase.transaction_id).await;
                purchase.needs_finish_transaction = false;
            }
        }
        handler(purchases);
    }

    async fn finish_logged(&self, transaction_id: &TransactionId) {
        if let Err(error) = self.finish_transaction(transaction_id).await {
            warn!(%transaction_id, %error, "failed to finish transaction");
        }
    }
}

impl ReconcilerState {
    fn next_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    fn register_purchase(
        &mut self,
        request: &PurchaseRequest,
        resolver: oneshot::Sender<PurchaseResult>,
    ) -> Option<RequestId> {
        if self.closed {
            return None;
        }
        let request_id = self.next_id();
        let waiting = self.purchases.entry(request.product_id.clone()).or_default();
        if !waiting.is_empty() {
            debug!(%request_id, product_id = %request.product_id, ahead = waiting.len(), "purchase queued behind pending purchase");
        }
        waiting.push_back(PendingPurchase {
            request_id,
            atomically: request.atomically,
            resolver,
        });
        Some(request_id)
    }

    fn register_restore(
        &mut self,
        request: &RestoreRequest,
        resolver: oneshot::Sender<RestoreResults>,
    ) -> Option<RequestId> {
        if self.closed {
            return None;
        }
        let request_id = self.next_id();
        self.restores.push_back(PendingRestore {
            request_id,
            atomically: request.atomically,
            resolver,
            results: RestoreResults::default(),
        });
        Some(request_id)
    }

    fn take_purchase(&mut self, product_id: &ProductId, request_id: RequestId) -> Option<PendingPurchase> {
        let waiting = self.purchases.get_mut(product_id)?;
        let index = waiting.iter().position(|p| p.request_id == request_id)?;
        let pending = waiting.remove(index);
        if waiting.is_empty() {
            self.purchases.remove(product_id);
        }
        pending
    }

    /// Oldest request for `product_id` whose caller is still waiting.
    /// Abandoned requests in front of it are discarded.
    fn pop_purchase(&mut self, product_id: &ProductId) -> Option<PendingPurchase> {
        let waiting = self.purchases.get_mut(product_id)?;
        let mut live = None;
        while let Some(pending) = waiting.pop_front() {
            if pending.resolver.is_closed() {
                debug!(request_id = %pending.request_id, %product_id, "skipping abandoned purchase");
                continue;
            }
            live = Some(pending);
            break;
        }
        if waiting.is_empty() {
            self.purchases.remove(product_id);
        }
        live
    }

    fn take_restore(&mut self, request_id: RequestId) -> Option<PendingRestore> {
        let index = self.restores.iter().position(|r| r.request_id == request_id)?;
        self.restores.remove(index)
    }

    fn apply(&mut self, event: QueueEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            QueueEvent::Updated(updates) => {
                let mut unclaimed = Vec::new();
                for update in updates {
                    self.route(update, &mut effects, &mut unclaimed);
                }
                self.dispatch_unclaimed(unclaimed, &mut effects);
            }
            QueueEvent::RestoreFinished => match self.restores.pop_front() {
                Some(pending) => effects.push(Effect::ResolveRestore {
                    request_id: pending.request_id,
                    resolver: pending.resolver,
                    results: pending.results,
                }),
                None => debug!("restore finished with no pending restore"),
            },
            QueueEvent::RestoreFailed(error) => match self.restores.pop_front() {
                Some(mut pending) => {
                    warn!(request_id = %pending.request_id, %error, "restore failed");
                    pending.results.restore_failed_purchases.push(RestoreFailure {
                        error: error.into(),
                        product_id: None,
                    });
                    effects.push(Effect::ResolveRestore {
                        request_id: pending.request_id,
                        resolver: pending.resolver,
                        results: pending.results,
                    });
                }
                None => warn!(%error, "restore failed with no pending restore"),
            },
        }

        effects
    }

    fn route(&mut self, update: TransactionUpdate, effects: &mut Vec<Effect>, unclaimed: &mut Vec<Purchase>) {
        let Some(result) = TransactionResult::classify(&update) else {
            debug!(transaction_id = %update.transaction_id, state = ?update.state, "non-terminal update");
            return;
        };

        if !self.seen.insert(update.transaction_id.clone()) {
            debug!(transaction_id = %update.transaction_id, "duplicate update dropped");
            return;
        }

        let transaction_id = update.transaction_id;
        let product_id = update.product_id;

        match result {
            TransactionResult::Purchased(mut purchase) => {
                if let Some(pending) = self.pop_purchase(&product_id) {
                    purchase.needs_finish_transaction = !pending.atomically;
                    effects.push(Effect::ResolvePurchase {
                        request_id: pending.request_id,
                        resolver: pending.resolver,
                        result: Ok(purchase),
                    });
                } else if let Some(restore) = self.restores.front_mut() {
                    warn!(%transaction_id, %product_id, "purchased transaction observed on restore path");
                    restore.results.restore_failed_purchases.push(RestoreFailure {
                        error: TransactionError::InternalInconsistency(format!(
                            "purchased transaction {transaction_id} observed on restore path"
                        )),
                        product_id: Some(product_id),
                    });
                } else {
                    unclaimed.push(purchase);
                }
            }
            TransactionResult::Failed(error) => {
                // Failed transactions are always acknowledged.
                effects.push(Effect::Finish(transaction_id.clone()));
                if let Some(pending) = self.pop_purchase(&product_id) {
                    effects.push(Effect::ResolvePurchase {
                        request_id: pending.request_id,
                        resolver: pending.resolver,
                        result: Err(error.into()),
                    });
                } else if let Some(restore) = self.restores.front_mut() {
                    restore.results.restore_failed_purchases.push(RestoreFailure {
                        error: error.into(),
                        product_id: None,
                    });
                } else {
                    warn!(%transaction_id, %product_id, %error, "unclaimed failed transaction");
                }
            }
            TransactionResult::Restored(mut purchase) => {
                if let Some(restore) = self.restores.front_mut() {
                    purchase.needs_finish_transaction = !restore.atomically;
                    if restore.atomically {
                        effects.push(Effect::Finish(transaction_id));
                    }
                    restore.results.restored_purchases.push(purchase);
                } else if let Some(pending) = self.pop_purchase(&product_id) {
                    warn!(%transaction_id, %product_id, "restored transaction observed on purchase path");
                    effects.push(Effect::ResolvePurchase {
                        request_id: pending.request_id,
                        resolver: pending.resolver,
                        result: Err(TransactionError::InternalInconsistency(format!(
                            "restored transaction {transaction_id} observed on purchase path"
                        ))),
                    });
                } else {
                    unclaimed.push(purchase);
                }
            }
        }
    }

    fn dispatch_unclaimed(&mut self, mut purchases: Vec<Purchase>, effects: &mut Vec<Effect>) {
        if purchases.is_empty() {
            return;
        }

        let Some(registration) = &self.completion else {
            debug!(count = purchases.len(), "holding unclaimed transactions until a completion handler registers");
            self.unclaimed.extend(purchases);
            return;
        };

        if registration.atomically {
            for purchase in &mut purchases {
                effects.push(Effect::Finish(purchase.transaction_id.clone()));
                purchase.needs_finish_transaction = false;
            }
        }
        effects.push(Effect::Deliver {
            handler: Arc::clone(&registration.handler),
            purchases,
        });
    }
}

/// Set of the most recently inserted ids, evicting the oldest past capacity.
struct RecentIds<T> {
    capacity: usize,
    members: HashSet<T>,
    order: VecDeque<T>,
}

impl<T: Clone + Eq + Hash> RecentIds<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            members: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `false` if `id` is already present.
    fn insert(&mut self, id: T) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    fn remove(&mut self, id: &T) {
        if self.members.remove(id) {
            self.order.retain(|member| member != id);
        }
    }

    #[cfg(test)]
    fn contains(&self, id: &T) -> bool {
        self.members.contains(id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.members.len()
    }
}
