//! Receipt: the validated purchase history of one user.
//!
//! A [`ReceiptInfo`] is the JSON object a receipt validator returns. It is kept
//! opaque; [`ReceiptItem`] is the typed view of the purchase records inside it.
//!
//! Records are read from two places:
//! - `receipt.in_app` (or a top-level `in_app` when handed the bare receipt)
//! - `latest_receipt_info`, which carries auto-renewal transactions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ReceiptError;
use crate::types::{ProductId, Timestamp, TransactionId};

/// Status code reported by a receipt validation server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// 0: the receipt is valid.
    Valid,
    /// 21000: the request body was not valid JSON.
    JsonNotReadable,
    /// 21002: the receipt data was malformed or missing.
    MalformedOrMissingData,
    /// 21003: the receipt could not be authenticated.
    ReceiptCouldNotBeAuthenticated,
    /// 21004: the shared secret does not match.
    SecretNotMatching,
    /// 21005: the receipt server is unavailable.
    ReceiptServerUnavailable,
    /// 21006: valid receipt, but the subscription has expired.
    SubscriptionExpired,
    /// 21007: a sandbox receipt was sent to production.
    TestReceipt,
    /// 21008: a production receipt was sent to sandbox.
    ProductionEnvironment,
    /// 21010: the receipt could not be authorized.
    Unauthorized,
    /// Any code not listed above.
    Other(i64),
}

impl ReceiptStatus {
    /// Map a numeric status code.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Valid,
            21000 => Self::JsonNotReadable,
            21002 => Self::MalformedOrMissingData,
            21003 => Self::ReceiptCouldNotBeAuthenticated,
            21004 => Self::SecretNotMatching,
            21005 => Self::ReceiptServerUnavailable,
            21006 => Self::SubscriptionExpired,
            21007 => Self::TestReceipt,
            21008 => Self::ProductionEnvironment,
            21010 => Self::Unauthorized,
            other => Self::Other(other),
        }
    }

    /// The numeric status code.
    pub fn code(self) -> i64 {
        match self {
            Self::Valid => 0,
            Self::JsonNotReadable => 21000,
            Self::MalformedOrMissingData => 21002,
            Self::ReceiptCouldNotBeAuthenticated => 21003,
            Self::SecretNotMatching => 21004,
            Self::ReceiptServerUnavailable => 21005,
            Self::SubscriptionExpired => 21006,
            Self::TestReceipt => 21007,
            Self::ProductionEnvironment => 21008,
            Self::Unauthorized => 21010,
            Self::Other(code) => code,
        }
    }

    /// Whether the receipt body can be trusted for verification.
    ///
    /// An expired subscription still comes with a usable receipt.
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid | Self::SubscriptionExpired)
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.code(), self)
    }
}

/// A validated receipt: an opaque mapping from field name to value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptInfo(Map<String, Value>);

impl ReceiptInfo {
    /// Wrap a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build from a JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self, ReceiptError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ReceiptError::JsonDecode(format!(
                "expected object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ReceiptError> {
        if bytes.is_empty() {
            return Err(ReceiptError::NoReceiptData);
        }
        Self::from_json(serde_json::from_slice(bytes)?)
    }

    /// Build from a validation server response, rejecting non-valid statuses.
    ///
    /// A response without a `status` field is accepted as-is.
    pub fn from_response(value: Value) -> Result<Self, ReceiptError> {
        let info = Self::from_json(value)?;
        match info.status() {
            Some(status) if !status.is_valid() => Err(ReceiptError::ReceiptInvalid { status }),
            _ => Ok(info),
        }
    }

    /// The validator status, if the mapping carries one.
    pub fn status(&self) -> Option<ReceiptStatus> {
        self.0
            .get("status")
            .and_then(value_as_i64)
            .map(ReceiptStatus::from_code)
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The underlying mapping.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Records from `receipt.in_app`, falling back to a top-level `in_app`.
    pub fn in_app_purchases(&self) -> Vec<ReceiptItem> {
        let nested = self
            .0
            .get("receipt")
            .and_then(Value::as_object)
            .and_then(|r| r.get("in_app"));
        parse_records(nested.or_else(|| self.0.get("in_app")))
    }

    /// Records from `latest_receipt_info`.
    pub fn latest_receipt_info(&self) -> Vec<ReceiptItem> {
        parse_records(self.0.get("latest_receipt_info"))
    }

    /// Records to use for subscription checks.
    ///
    /// `latest_receipt_info` wins when present since it includes renewals.
    pub fn subscription_records(&self) -> Vec<ReceiptItem> {
        if self.0.contains_key("latest_receipt_info") {
            self.latest_receipt_info()
        } else {
            self.in_app_purchases()
        }
    }

    /// Every record from both sources.
    pub fn all_purchase_records(&self) -> Vec<ReceiptItem> {
        let mut records = self.in_app_purchases();
        records.extend(self.latest_receipt_info());
        records
    }
}

impl From<Map<String, Value>> for ReceiptInfo {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One purchase record from a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub transaction_id: TransactionId,
    /// Equal to `transaction_id` for the first purchase of a renewal chain.
    pub original_transaction_id: TransactionId,
    pub purchase_date: Timestamp,
    pub original_purchase_date: Timestamp,
    /// Set for auto-renewable subscriptions.
    pub expires_date: Option<Timestamp>,
    /// Set when the purchase was refunded or revoked.
    pub cancellation_date: Option<Timestamp>,
    pub is_trial_period: bool,
    pub is_in_intro_offer_period: bool,
}

impl ReceiptItem {
    /// Parse a single purchase record object.
    pub fn from_record(record: &Map<String, Value>) -> Result<Self, ReceiptError> {
        let product_id = ProductId::new(required_str(record, "product_id")?);
        let transaction_id = TransactionId::new(required_str(record, "transaction_id")?);
        let purchase_date =
            optional_millis(record, "purchase_date_ms")?.ok_or(ReceiptError::MissingField("purchase_date_ms"))?;

        let original_transaction_id = match record.get("original_transaction_id") {
            Some(_) => TransactionId::new(required_str(record, "original_transaction_id")?),
            None => transaction_id.clone(),
        };
        let original_purchase_date =
            optional_millis(record, "original_purchase_date_ms")?.unwrap_or(purchase_date);

        let quantity = match record.get("quantity") {
            None | Some(Value::Null) => 1,
            Some(v) => value_as_i64(v)
                .and_then(|q| u32::try_from(q).ok())
                .ok_or_else(|| ReceiptError::InvalidField {
                    field: "quantity",
                    value: v.to_string(),
                })?,
        };

        Ok(Self {
            product_id,
            quantity,
            transaction_id,
            original_transaction_id,
            purchase_date,
            original_purchase_date,
            expires_date: optional_millis(record, "expires_date_ms")?,
            cancellation_date: optional_millis(record, "cancellation_date_ms")?,
            is_trial_period: flag(record, "is_trial_period")?,
            is_in_intro_offer_period: flag(record, "is_in_intro_offer_period")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Field helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_records(value: Option<&Value>) -> Vec<ReceiptItem> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let Some(record) = entry.as_object() else {
                tracing::warn!("skipping purchase record that is not an object");
                return None;
            };
            match ReceiptItem::from_record(record) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparseable purchase record");
                    None
                }
            }
        })
        .collect()
}

fn required_str<'a>(record: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, ReceiptError> {
    match record.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ReceiptError::InvalidField {
            field,
            value: other.to_string(),
        }),
        None => Err(ReceiptError::MissingField(field)),
    }
}

fn optional_millis(
    record: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<Timestamp>, ReceiptError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => value_as_i64(v)
            .map(|ms| Some(Timestamp::from_millis(ms)))
            .ok_or_else(|| ReceiptError::InvalidField {
                field,
                value: v.to_string(),
            }),
    }
}

fn flag(record: &Map<String, Value>, field: &'static str) -> Result<bool, ReceiptError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s == "true" => Ok(true),
        Some(Value::String(s)) if s == "false" => Ok(false),
        Some(other) => Err(ReceiptError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}

/// Numbers arrive either as JSON numbers or as decimal strings.
fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
