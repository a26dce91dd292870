//! Proptest generators for property-based testing.

use proptest::prelude::*;

use iapkit_core::{ProductId, ReceiptInfo, Timestamp, TransactionId};

use crate::fixtures::{ReceiptBuilder, RecordBuilder};

/// Generate a product id from a small pool, so collisions happen.
pub fn product_id() -> impl Strategy<Value = ProductId> {
    "com\\.example\\.[a-e]".prop_map(ProductId::new)
}

/// Generate a numeric transaction id, as the platform issues them.
pub fn transaction_id() -> impl Strategy<Value = TransactionId> {
    (1u64..=9_999_999_999_999u64).prop_map(|n| TransactionId::new(n.to_string()))
}

/// Generate a timestamp between 2001 and 2033.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (1_000_000_000_000i64..=2_000_000_000_000i64).prop_map(Timestamp::from_millis)
}

/// Parameters for generating one purchase record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub product_id: ProductId,
    pub transaction_id: TransactionId,
    pub purchase_date: Timestamp,
    /// Milliseconds from purchase to expiry, for subscription records.
    pub expires_after: Option<i64>,
    pub cancelled: bool,
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            product_id(),
            transaction_id(),
            timestamp(),
            proptest::option::of(1i64..=400 * 24 * 60 * 60 * 1000),
            proptest::bool::weighted(0.1),
        )
            .prop_map(|(product_id, transaction_id, purchase_date, expires_after, cancelled)| {
                RecordParams {
                    product_id,
                    transaction_id,
                    purchase_date,
                    expires_after,
                    cancelled,
                }
            })
            .boxed()
    }
}

impl RecordParams {
    pub fn to_record(&self) -> RecordBuilder {
        let mut record = RecordBuilder::new(
            self.product_id.clone(),
            self.transaction_id.clone(),
            self.purchase_date,
        );
        if let Some(after) = self.expires_after {
            record = record.expires(Timestamp::from_millis(self.purchase_date.as_millis() + after));
        }
        if self.cancelled {
            record = record.cancelled(self.purchase_date);
        }
        record
    }
}

/// Generate up to `max_len` records with distinct transaction ids.
pub fn records(max_len: usize) -> impl Strategy<Value = Vec<RecordParams>> {
    prop::collection::vec(any::<RecordParams>(), 0..=max_len).prop_map(|mut records| {
        records.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));
        records.dedup_by(|a, b| a.transaction_id == b.transaction_id);
        records
    })
}

/// Build a receipt carrying `records` in both `in_app` and `latest_receipt_info`.
pub fn receipt_from_records(records: &[RecordParams]) -> ReceiptInfo {
    records
        .iter()
        .fold(ReceiptBuilder::new(), |builder, params| {
            builder.in_app(params.to_record()).latest(params.to_record())
        })
        .build()
}
