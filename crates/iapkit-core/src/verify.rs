//! Purchase verification: ownership and subscription validity.
//!
//! Every function here is a pure function of the receipt and its arguments.
//!
//! ## Subscription selection
//!
//! Renewals show up as separate records for the same product. The record with
//! the latest `purchase_date` is authoritative. Records sharing a purchase date
//! are ordered by transaction id, descending, comparing numerically when both
//! ids are decimal and lexicographically otherwise, so the result never depends
//! on the order records appear in the receipt.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::receipt::{ReceiptInfo, ReceiptItem};
use crate::types::{ProductId, Timestamp, TransactionId};

/// How a subscription product expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionType {
    /// Expiry comes from the record's `expires_date`.
    AutoRenewable,
    /// Expiry is `purchase_date + valid_duration`.
    NonRenewing { valid_duration: Duration },
}

/// Result of an ownership check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyPurchaseResult {
    NotPurchased,
    Purchased(ReceiptItem),
}

impl VerifyPurchaseResult {
    pub fn is_purchased(&self) -> bool {
        matches!(self, Self::Purchased(_))
    }
}

/// Result of a subscription check.
///
/// `items` holds every matching record, most recent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifySubscriptionResult {
    NotPurchased,
    Purchased {
        expiry_date: Timestamp,
        items: Vec<ReceiptItem>,
    },
    Expired {
        expiry_date: Timestamp,
        items: Vec<ReceiptItem>,
    },
}

impl VerifySubscriptionResult {
    /// Whether the subscription is active at the reference date.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Purchased { .. })
    }

    /// The effective expiry date, if any record matched.
    pub fn expiry_date(&self) -> Option<Timestamp> {
        match self {
            Self::NotPurchased => None,
            Self::Purchased { expiry_date, .. } | Self::Expired { expiry_date, .. } => {
                Some(*expiry_date)
            }
        }
    }
}

/// Check whether `product_id` appears in any purchase record.
pub fn verify_purchase(product_id: &ProductId, receipt: &ReceiptInfo) -> VerifyPurchaseResult {
    receipt
        .all_purchase_records()
        .into_iter()
        .find(|item| &item.product_id == product_id)
        .map_or(VerifyPurchaseResult::NotPurchased, VerifyPurchaseResult::Purchased)
}

/// Check whether the subscription `product_id` is valid at `reference_date`.
pub fn verify_subscription(
    subscription: SubscriptionType,
    product_id: &ProductId,
    receipt: &ReceiptInfo,
    reference_date: Timestamp,
) -> VerifySubscriptionResult {
    let items = receipt
        .subscription_records()
        .into_iter()
        .filter(|item| &item.product_id == product_id)
        .collect();
    evaluate(subscription, items, reference_date)
}

/// Check a subscription group: the most recent record across all of
/// `product_ids` decides.
pub fn verify_subscriptions(
    subscription: SubscriptionType,
    product_ids: &BTreeSet<ProductId>,
    receipt: &ReceiptInfo,
    reference_date: Timestamp,
) -> VerifySubscriptionResult {
    let items = receipt
        .subscription_records()
        .into_iter()
        .filter(|item| product_ids.contains(&item.product_id))
        .collect();
    evaluate(subscription, items, reference_date)
}

/// Product ids present in the receipt that pass `filter`.
pub fn distinct_purchase_ids<F>(receipt: &ReceiptInfo, filter: F) -> BTreeSet<ProductId>
where
    F: Fn(&ProductId) -> bool,
{
    receipt
        .all_purchase_records()
        .into_iter()
        .map(|item| item.product_id)
        .filter(|id| filter(id))
        .collect()
}

fn evaluate(
    subscription: SubscriptionType,
    mut items: Vec<ReceiptItem>,
    reference_date: Timestamp,
) -> VerifySubscriptionResult {
    if items.is_empty() {
        return VerifySubscriptionResult::NotPurchased;
    }

    sort_most_recent_first(&mut items);
    let latest = &items[0];

    let expiry_date = match subscription {
        SubscriptionType::AutoRenewable => {
            if let Some(cancelled) = latest.cancellation_date.filter(|c| *c <= reference_date) {
                return VerifySubscriptionResult::Expired {
                    expiry_date: cancelled,
                    items,
                };
            }
            latest.expires_date.unwrap_or(latest.purchase_date)
        }
        SubscriptionType::NonRenewing { valid_duration } => {
            latest.purchase_date.saturating_add(valid_duration)
        }
    };

    if expiry_date >= reference_date {
        VerifySubscriptionResult::Purchased { expiry_date, items }
    } else {
        VerifySubscriptionResult::Expired { expiry_date, items }
    }
}

fn sort_most_recent_first(items: &mut [ReceiptItem]) {
    items.sort_by(|a, b| {
        b.purchase_date
            .cmp(&a.purchase_date)
            .then_with(|| compare_transaction_ids(&b.transaction_id, &a.transaction_id))
    });
}

fn compare_transaction_ids(a: &TransactionId, b: &TransactionId) -> Ordering {
    match (a.as_str().parse::<u128>(), b.as_str().parse::<u128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.as_str().cmp(b.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    const DAY: Duration = Duration::from_secs(86_400);

    fn record(product: &str, txn: &str, purchase_ms: i64, expires_ms: Option<i64>) -> Value {
        let mut r = json!({
            "product_id": product,
            "transaction_id": txn,
            "purchase_date_ms": purchase_ms.to_string(),
        });
        if let Some(e) = expires_ms {
            r["expires_date_ms"] = json!(e.to_string());
        }
        r
    }

    fn receipt(records: Vec<Value>) -> ReceiptInfo {
        ReceiptInfo::from_json(json!({ "receipt": { "in_app": records } })).unwrap()
    }

    #[test]
    fn test_verify_purchase_found() {
        let r = receipt(vec![record("a", "1", 1000, None), record("b", "2", 2000, None)]);
        match verify_purchase(&ProductId::from("b"), &r) {
            VerifyPurchaseResult::Purchased(item) => {
                assert_eq!(item.transaction_id, TransactionId::from("2"))
            }
            other => panic!("expected Purchased, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_purchase_missing() {
        let r = receipt(vec![record("a", "1", 1000, None)]);
        assert_eq!(
            verify_purchase(&ProductId::from("z"), &r),
            VerifyPurchaseResult::NotPurchased
        );
        assert_eq!(
            verify_purchase(&ProductId::from("a"), &ReceiptInfo::default()),
            VerifyPurchaseResult::NotPurchased
        );
    }

    #[test]
    fn test_subscription_not_purchased() {
        let r = receipt(vec![record("other", "1", 1000, Some(5000))]);
        let result = verify_subscription(
            SubscriptionType::AutoRenewable,
            &ProductId::from("sub"),
            &r,
            Timestamp::from_millis(2000),
        );
        assert_eq!(result, VerifySubscriptionResult::NotPurchased);
    }

    #[test]
    fn test_auto_renewable_uses_latest_record() {
        // Older record expired, newer renewal still active.
        let r = receipt(vec![
            record("sub", "2", 2000, Some(10_000)),
            record("sub", "1", 1000, Some(1500)),
        ]);
        let result = verify_subscription(
            SubscriptionType::AutoRenewable,
            &ProductId::from("sub"),
            &r,
            Timestamp::from_millis(5000),
        );
        assert!(result.is_active());
        assert_eq!(result.expiry_date(), Some(Timestamp::from_millis(10_000)));
    }

    #[test]
    fn test_auto_renewable_expired() {
        let r = receipt(vec![record("sub", "1", 1000, Some(1500))]);
        let result = verify_subscription(
            SubscriptionType::AutoRenewable,
            &ProductId::from("sub"),
            &r,
            Timestamp::from_millis(5000),
        );
        assert!(matches!(
            result,
            VerifySubscriptionResult::Expired { expiry_date, .. } if expiry_date == Timestamp::from_millis(1500)
        ));
    }

    #[test]
    fn test_auto_renewable_without_expiry_expires_at_purchase() {
        let r = receipt(vec![record("sub", "1", 1000, None)]);
        let product = ProductId::from("sub");

        let later = verify_subscription(SubscriptionType::AutoRenewable, &product, &r, Timestamp::from_millis(1001));
        assert!(matches!(
            later,
            VerifySubscriptionResult::Expired { expiry_date, .. } if expiry_date == Timestamp::from_millis(1000)
        ));

        let at_purchase = verify_subscription(SubscriptionType::AutoRenewable, &product, &r, Timestamp::from_millis(1000));
        assert!(at_purchase.is_active());
        assert_eq!(at_purchase.expiry_date(), Some(Timestamp::from_millis(1000)));
    }

    #[test]
    fn test_auto_renewable_cancellation_overrides_expiry() {
        let mut rec = record("sub", "1", 1000, Some(100_000));
        rec["cancellation_date_ms"] = json!("3000");
        let r = receipt(vec![rec]);

        let before = verify_subscription(
            SubscriptionType::AutoRenewable,
            &ProductId::from("sub"),
            &r,
            Timestamp::from_millis(2000),
        );
        assert!(before.is_active());

        let after = verify_subscription(
            SubscriptionType::AutoRenewable,
            &ProductId::from("sub"),
            &r,
            Timestamp::from_millis(3000),
        );
        assert!(matches!(
            after,
            VerifySubscriptionResult::Expired { expiry_date, .. } if expiry_date == Timestamp::from_millis(3000)
        ));
    }

    #[test]
    fn test_non_renewing_boundaries() {
        let t = Timestamp::from_secs(1_700_000_000);
        let d = 30 * DAY;
        let r = receipt(vec![record("pass", "1", t.as_millis(), None)]);
        let sub = SubscriptionType::NonRenewing { valid_duration: d };
        let expiry = t.saturating_add(d);

        let inside = verify_subscription(
            sub,
            &ProductId::from("pass"),
            &r,
            expiry.saturating_sub(Duration::from_secs(1)),
        );
        assert!(matches!(
            inside,
            VerifySubscriptionResult::Purchased { expiry_date, .. } if expiry_date == expiry
        ));

        let outside = verify_subscription(
            sub,
            &ProductId::from("pass"),
            &r,
            expiry.saturating_add(Duration::from_secs(1)),
        );
        assert!(matches!(
            outside,
            VerifySubscriptionResult::Expired { expiry_date, .. } if expiry_date == expiry
        ));
    }

    #[test]
    fn test_identical_purchase_dates_tie_break_on_transaction_id() {
        let r = receipt(vec![
            record("sub", "9", 1000, Some(2000)),
            record("sub", "10", 1000, Some(9000)),
        ]);
        let result = verify_subscription(
            SubscriptionType::AutoRenewable,
            &ProductId::from("sub"),
            &r,
            Timestamp::from_millis(1500),
        );
        // "10" > "9" numerically even though it sorts lower as a string.
        assert_eq!(result.expiry_date(), Some(Timestamp::from_millis(9000)));
    }

    #[test]
    fn test_subscription_group() {
        let r = receipt(vec![
            record("monthly", "1", 1000, Some(2000)),
            record("yearly", "2", 3000, Some(50_000)),
            record("unrelated", "3", 9000, Some(9500)),
        ]);
        let group: BTreeSet<ProductId> = ["monthly", "yearly"].into_iter().map(ProductId::from).collect();
        let result = verify_subscriptions(
            SubscriptionType::AutoRenewable,
            &group,
            &r,
            Timestamp::from_millis(10_000),
        );
        match result {
            VerifySubscriptionResult::Purchased { expiry_date, items } => {
                assert_eq!(expiry_date, Timestamp::from_millis(50_000));
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].product_id, ProductId::from("yearly"));
            }
            other => panic!("expected Purchased, got {:?}", other),
        }
    }

    #[test]
    fn test_distinct_purchase_ids() {
        let r = receipt(vec![
            record("a", "1", 1000, None),
            record("a", "2", 2000, None),
            record("pro.b", "3", 3000, None),
        ]);
        let all = distinct_purchase_ids(&r, |_| true);
        assert_eq!(all.len(), 2);

        let pro = distinct_purchase_ids(&r, |id| id.as_str().starts_with("pro."));
        assert_eq!(pro.into_iter().collect::<Vec<_>>(), vec![ProductId::from("pro.b")]);
    }

    proptest! {
        #[test]
        fn test_verify_purchase_iff_present(
            products in prop::collection::vec("[a-d]", 0..8),
            wanted in "[a-e]",
        ) {
            let records = products
                .iter()
                .enumerate()
                .map(|(i, p)| record(p, &i.to_string(), 1000 + i as i64, None))
                .collect();
            let r = receipt(records);
            let present = products.iter().any(|p| p == &wanted);
            prop_assert_eq!(verify_purchase(&ProductId::new(wanted), &r).is_purchased(), present);
        }

        #[test]
        fn test_subscription_selection_ignores_input_order(
            dates in prop::collection::vec(0i64..1_000_000, 1..10),
            reference in 0i64..2_000_000,
        ) {
            let mut records: Vec<Value> = dates
                .iter()
                .enumerate()
                .map(|(i, d)| record("sub", &i.to_string(), *d, Some(d + 1000 + i as i64)))
                .collect();
            let forward = verify_subscription(
                SubscriptionType::AutoRenewable,
                &ProductId::from("sub"),
                &receipt(records.clone()),
                Timestamp::from_millis(reference),
            );
            records.reverse();
            let backward = verify_subscription(
                SubscriptionType::AutoRenewable,
                &ProductId::from("sub"),
                &receipt(records),
                Timestamp::from_millis(reference),
            );
            prop_assert_eq!(forward.expiry_date(), backward.expiry_date());
            prop_assert_eq!(forward.is_active(), backward.is_active());
        }
    }
}
