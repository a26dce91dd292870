//! Receipt validation and verification through the Store.

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;

use iapkit::core::{ReceiptError, ReceiptStatus};
use iapkit::{
    ProductId, StoreConfig, StoreError, SubscriptionType, Timestamp, VerifyPurchaseResult,
    VerifySubscriptionResult,
};
use iapkit_testkit::{default_products, receipt_from_records, records, ReceiptBuilder, RecordBuilder, TestHarness};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const MONTHLY: &str = "com.example.monthly";

fn harness_with(receipt: ReceiptBuilder) -> TestHarness {
    let config = StoreConfig {
        shared_secret: Some("secret".into()),
        ..Default::default()
    };
    TestHarness::with_config(default_products(), receipt.validator(), config)
}

#[tokio::test]
async fn test_verify_receipt_then_purchase() -> anyhow::Result<()> {
    let harness = harness_with(
        ReceiptBuilder::new().in_app(RecordBuilder::new("com.example.pro", "1000", Timestamp::from_millis(DAY_MS))),
    );

    let receipt = harness
        .store
        .verify_receipt(&Bytes::from_static(b"base64-receipt"), None)
        .await?;
    assert_eq!(harness.store.validator().secrets(), vec![Some("secret".to_string())]);

    match harness.store.verify_purchase(&ProductId::from("com.example.pro"), &receipt) {
        VerifyPurchaseResult::Purchased(item) => assert_eq!(item.transaction_id.as_str(), "1000"),
        other => panic!("expected Purchased, got {:?}", other),
    }
    assert_eq!(
        harness.store.verify_purchase(&ProductId::from("com.example.coins"), &receipt),
        VerifyPurchaseResult::NotPurchased
    );
    Ok(())
}

#[tokio::test]
async fn test_rejected_receipt_surfaces_status() {
    let harness = harness_with(ReceiptBuilder::new().status(21004));

    let result = harness
        .store
        .verify_receipt(&Bytes::from_static(b"base64-receipt"), None)
        .await;
    assert!(matches!(
        result,
        Err(StoreError::Validator(iapkit::queue::ValidatorError::Receipt(
            ReceiptError::ReceiptInvalid {
                status: ReceiptStatus::SecretNotMatching
            }
        )))
    ));
}

#[tokio::test]
async fn test_subscription_expired_status_still_verifies() -> anyhow::Result<()> {
    let purchase = Timestamp::from_millis(10 * DAY_MS);
    let harness = harness_with(
        ReceiptBuilder::new()
            .status(21006)
            .latest(RecordBuilder::new(MONTHLY, "1", purchase).expires(Timestamp::from_millis(40 * DAY_MS))),
    );

    let receipt = harness.store.verify_receipt(&Bytes::from_static(b"r"), None).await?;
    let result = harness.store.verify_subscription(
        SubscriptionType::AutoRenewable,
        &ProductId::from(MONTHLY),
        &receipt,
        Timestamp::from_millis(41 * DAY_MS),
    );
    assert_eq!(result.expiry_date(), Some(Timestamp::from_millis(40 * DAY_MS)));
    assert!(!result.is_active());
    Ok(())
}

#[test]
fn test_non_renewing_boundary() {
    let purchased = Timestamp::from_millis(100 * DAY_MS);
    let receipt = ReceiptBuilder::new()
        .in_app(RecordBuilder::new("com.example.season", "7", purchased))
        .build();
    let validity = Duration::from_secs(30 * 24 * 60 * 60);
    let expiry = purchased.saturating_add(validity);
    let product = ProductId::from("com.example.season");
    let subscription = SubscriptionType::NonRenewing { valid_duration: validity };

    let before = iapkit::core::verify_subscription(
        subscription,
        &product,
        &receipt,
        expiry.saturating_sub(Duration::from_secs(1)),
    );
    assert!(matches!(before, VerifySubscriptionResult::Purchased { expiry_date, .. } if expiry_date == expiry));

    let after = iapkit::core::verify_subscription(
        subscription,
        &product,
        &receipt,
        expiry.saturating_add(Duration::from_secs(1)),
    );
    assert!(matches!(after, VerifySubscriptionResult::Expired { expiry_date, .. } if expiry_date == expiry));
}

#[test]
fn test_subscription_group_uses_latest_record() {
    let receipt = ReceiptBuilder::new()
        .latest(
            RecordBuilder::new("com.example.monthly", "10", Timestamp::from_millis(0))
                .expires(Timestamp::from_millis(30 * DAY_MS)),
        )
        .latest(
            RecordBuilder::new("com.example.yearly", "11", Timestamp::from_millis(20 * DAY_MS))
                .expires(Timestamp::from_millis(385 * DAY_MS)),
        )
        .build();
    let group: BTreeSet<ProductId> = ["com.example.monthly", "com.example.yearly"]
        .into_iter()
        .map(ProductId::from)
        .collect();

    let result = iapkit::core::verify_subscriptions(
        SubscriptionType::AutoRenewable,
        &group,
        &receipt,
        Timestamp::from_millis(100 * DAY_MS),
    );
    assert!(result.is_active());
    assert_eq!(result.expiry_date(), Some(Timestamp::from_millis(385 * DAY_MS)));
}

#[test]
fn test_refunded_subscription_expires_at_cancellation() {
    let cancelled = Timestamp::from_millis(5 * DAY_MS);
    let receipt = ReceiptBuilder::new()
        .latest(
            RecordBuilder::new(MONTHLY, "1", Timestamp::from_millis(0))
                .expires(Timestamp::from_millis(30 * DAY_MS))
                .cancelled(cancelled),
        )
        .build();

    let result = iapkit::core::verify_subscription(
        SubscriptionType::AutoRenewable,
        &ProductId::from(MONTHLY),
        &receipt,
        Timestamp::from_millis(10 * DAY_MS),
    );
    assert!(matches!(result, VerifySubscriptionResult::Expired { expiry_date, .. } if expiry_date == cancelled));
}

proptest! {
    #[test]
    fn test_distinct_purchase_ids_match_records(records in records(24)) {
        let receipt = receipt_from_records(&records);
        let expected: BTreeSet<ProductId> = records.iter().map(|r| r.product_id.clone()).collect();
        prop_assert_eq!(iapkit::core::distinct_purchase_ids(&receipt, |_| true), expected);
    }

    #[test]
    fn test_auto_renewable_not_purchased_iff_no_record(records in records(12), offset in 0i64..=DAY_MS) {
        let receipt = receipt_from_records(&records);
        let product = ProductId::from("com.example.a");
        let reference = Timestamp::from_millis(1_500_000_000_000 + offset);

        let result = iapkit::core::verify_subscription(SubscriptionType::AutoRenewable, &product, &receipt, reference);
        let matching: Vec<_> = records.iter().filter(|r| r.product_id == product).collect();
        prop_assert_eq!(matching.is_empty(), result == VerifySubscriptionResult::NotPurchased);
    }
}
