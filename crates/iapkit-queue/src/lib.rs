//! # iapkit Queue
//!
//! Contracts for the platform services iapkit sits on top of. None of them
//! are implemented here for a real platform; the platform glue implements the
//! traits and forwards queue callbacks as [`QueueEvent`]s.
//!
//! ## Key Types
//!
//! - [`PaymentQueue`] - Accepts payments, restores, and finish acknowledgments
//! - [`ProductCatalog`] - Resolves product ids to product metadata
//! - [`ReceiptValidator`] - Turns raw receipt bytes into a [`ReceiptInfo`](iapkit_core::ReceiptInfo)
//! - [`QueueEvent`] - What the payment queue reports back, asynchronously
//!
//! ## In-memory implementations
//!
//! The [`memory`] module provides [`MemoryPaymentQueue`], [`MemoryCatalog`]
//! and [`StaticValidator`] for tests and local simulation.
//!
//! ## Event delivery
//!
//! ```rust,no_run
//! use iapkit_queue::{MemoryPaymentQueue, QueueEvent};
//!
//! async fn example() {
//!     let (queue, mut events) = MemoryPaymentQueue::new();
//!     queue.emit(QueueEvent::RestoreFinished);
//!     let event = events.recv().await;
//! }
//! ```

pub mod error;
pub mod events;
pub mod memory;
pub mod traits;

pub use error::{CatalogError, QueueError, ValidatorError};
pub use events::{Payment, Product, QueueEvent, RetrieveResults, TransactionState, TransactionUpdate};
pub use memory::{MemoryCatalog, MemoryPaymentQueue, StaticValidator};
pub use traits::{PaymentQueue, ProductCatalog, ReceiptValidator};
