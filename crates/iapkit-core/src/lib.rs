//! # iapkit Core
//!
//! Pure primitives for iapkit: the parsed receipt model and the decision
//! logic that answers ownership and subscription questions over it.
//!
//! This crate contains no I/O, no queue, no networking. It is pure computation
//! over already-validated receipt data.
//!
//! ## Key Types
//!
//! - [`ReceiptInfo`] - Opaque JSON mapping returned by a receipt validator
//! - [`ReceiptItem`] - Typed view of one purchase record
//! - [`ProductId`], [`TransactionId`] - Identifier newtypes
//! - [`Timestamp`] - Unix milliseconds, the unit receipts use for dates
//!
//! ## Verification
//!
//! See the [`verify`] module for [`verify_purchase`] and [`verify_subscription`].

pub mod error;
pub mod receipt;
pub mod types;
pub mod verify;

pub use error::ReceiptError;
pub use receipt::{ReceiptInfo, ReceiptItem, ReceiptStatus};
pub use types::{ProductId, Timestamp, TransactionId};
pub use verify::{
    distinct_purchase_ids, verify_purchase, verify_subscription, verify_subscriptions,
    SubscriptionType, VerifyPurchaseResult, VerifySubscriptionResult,
};
