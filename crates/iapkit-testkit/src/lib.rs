//! # iapkit Testkit
//!
//! Testing utilities for iapkit.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Receipt JSON builders and a [`TestHarness`] wiring a store to
//!   in-memory collaborators
//! - **Generators**: Proptest strategies for purchase records
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use iapkit_testkit::generators::{records, receipt_from_records};
//!
//! proptest! {
//!     #[test]
//!     fn purchased_products_verify(records in records(8)) {
//!         let receipt = receipt_from_records(&records);
//!         for r in &records {
//!             prop_assert!(iapkit_core::verify_purchase(&r.product_id, &receipt).is_purchased());
//!         }
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Quickly set up a receipt:
//!
//! ```rust
//! use iapkit_core::Timestamp;
//! use iapkit_testkit::fixtures::{ReceiptBuilder, RecordBuilder};
//!
//! let receipt = ReceiptBuilder::new()
//!     .in_app(RecordBuilder::new("com.example.pro", "1000", Timestamp::from_millis(0)))
//!     .build();
//! assert_eq!(receipt.in_app_purchases().len(), 1);
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{default_products, MemoryStore, ReceiptBuilder, RecordBuilder, TestHarness};
pub use generators::{receipt_from_records, records, RecordParams};
