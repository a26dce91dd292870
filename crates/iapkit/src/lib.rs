//! # iapkit
//!
//! In-app purchase transaction reconciliation and receipt verification.
//!
//! ## Overview
//!
//! iapkit sits between an application and a platform store:
//!
//! - **Products**: Look up product metadata, cached by id
//! - **Purchases**: Submit payments and await their terminal outcome
//! - **Restores**: Collect re-delivered purchases into one batch result
//! - **Receipts**: Validate receipts and answer ownership and subscription questions
//!
//! ## Key Concepts
//!
//! - **Atomic purchase**: Finished automatically on success. Non-atomic
//!   purchases come back with `needs_finish_transaction` set and must be
//!   finished by the caller once the content is delivered.
//! - **Unclaimed transaction**: A terminal update no request is waiting for
//!   (renewals, interrupted purchases). Delivered to the handler registered
//!   with [`Store::complete_transactions`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use iapkit::{Store, StoreConfig};
//! use iapkit::queue::{MemoryCatalog, MemoryPaymentQueue, Product, StaticValidator};
//! use serde_json::json;
//!
//! async fn example() {
//!     let (queue, events) = MemoryPaymentQueue::new();
//!     let catalog = MemoryCatalog::new([Product::new("com.example.pro", "4.99")]);
//!     let validator = StaticValidator::from_response(json!({ "status": 0 }));
//!
//!     let store = Store::new(queue, catalog, validator, StoreConfig::default());
//!     store.spawn_event_loop(events);
//!
//!     store
//!         .complete_transactions(true, |purchases| {
//!             for purchase in purchases {
//!                 println!("delivered {}", purchase.product_id);
//!             }
//!         })
//!         .await;
//!
//!     match store.purchase_product("com.example.pro").await {
//!         Ok(purchase) => println!("purchased {}", purchase.transaction_id),
//!         Err(e) if e.is_cancellation() => {}
//!         Err(e) => eprintln!("purchase failed: {e}"),
//!     }
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `iapkit::core` - Receipt model and verification
//! - `iapkit::queue` - Collaborator traits and in-memory implementations
//! - `iapkit::reconcile` - Request tracking and update routing

pub mod error;
pub mod store;

// Re-export component crates
pub use iapkit_core as core;
pub use iapkit_queue as queue;
pub use iapkit_reconcile as reconcile;

// Re-export main types for convenience
pub use error::{Result, StoreError};
pub use store::{PurchaseOptions, Store, StoreConfig};

// Re-export commonly used types
pub use iapkit_core::{
    ProductId, ReceiptInfo, SubscriptionType, Timestamp, TransactionId, VerifyPurchaseResult,
    VerifySubscriptionResult,
};
pub use iapkit_reconcile::{Purchase, RestoreFailure, RestoreRequest, RestoreResults};
