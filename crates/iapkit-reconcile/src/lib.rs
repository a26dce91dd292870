//! # iapkit Reconcile
//!
//! Matches asynchronous payment queue updates to the requests waiting on them.
//!
//! ## Overview
//!
//! Purchases and restores are submitted to the platform queue, which reports
//! outcomes later and possibly from another execution context. The
//! [`Reconciler`] keeps a table of pending requests and resolves each one
//! exactly once when the matching terminal update (or restore batch) arrives.
//!
//! ## Routing
//!
//! | Update | Goes to |
//! |---|---|
//! | `Purchased` / `Failed` | oldest pending purchase of that product, else the pending restore |
//! | `Restored` | pending restore, else a pending purchase of that product (as an inconsistency) |
//! | anything unclaimed | the complete-transactions handler |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iapkit_queue::MemoryPaymentQueue;
//! use iapkit_reconcile::{PurchaseRequest, Reconciler};
//!
//! async fn example() {
//!     let (queue, events) = MemoryPaymentQueue::new();
//!     let reconciler = Arc::new(Reconciler::new(Arc::new(queue)));
//!
//!     let driver = Arc::clone(&reconciler);
//!     tokio::spawn(async move { driver.drive(events).await });
//!
//!     let result = reconciler.purchase(PurchaseRequest::new("com.example.pro")).await;
//! }
//! ```

pub mod error;
pub mod reconciler;
pub mod results;

pub use error::{Result, TransactionError};
pub use reconciler::{CompletionHandler, Reconciler, RequestId, RECENT_TRANSACTION_CAPACITY};
pub use results::{
    Purchase, PurchaseRequest, PurchaseResult, RestoreFailure, RestoreRequest, RestoreResults,
    TransactionResult,
};
