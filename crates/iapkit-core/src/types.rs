//! Strong type definitions for iapkit.
//!
//! Identifiers are newtypes so a product id can never be passed where a
//! transaction id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A platform product identifier, e.g. `com.example.pro.monthly`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Create a product id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProductId({})", self.0)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A platform transaction identifier.
///
/// Platforms issue these as decimal strings, but nothing here relies on that.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Create a transaction id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A point in time as Unix milliseconds.
///
/// Receipts carry every date as `*_date_ms`, so this is the native unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    /// Create from Unix milliseconds.
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// Create from Unix seconds.
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Unix milliseconds.
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(Self::since_epoch)
            .unwrap_or(Self(0))
    }

    /// Timestamp `d` after the Unix epoch, clamping at the representable maximum.
    pub fn since_epoch(d: Duration) -> Self {
        Self(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }

    /// Add a duration, clamping at the representable maximum.
    pub fn saturating_add(self, d: Duration) -> Self {
        let ms = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(ms))
    }

    /// Subtract a duration, clamping at the representable minimum.
    pub fn saturating_sub(self, d: Duration) -> Self {
        let ms = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id_display() {
        let id = ProductId::from("com.example.pro");
        assert_eq!(id.to_string(), "com.example.pro");
        assert_eq!(format!("{:?}", id), "ProductId(com.example.pro)");
    }

    #[test]
    fn test_product_id_serde_transparent() {
        let id = ProductId::from("com.example.pro");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"com.example.pro\"");
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_secs(100);
        assert_eq!(t.as_millis(), 100_000);
        assert_eq!(t.saturating_add(Duration::from_secs(1)), Timestamp::from_millis(101_000));
        assert_eq!(t.saturating_sub(Duration::from_millis(1)), Timestamp::from_millis(99_999));
    }

    #[test]
    fn test_timestamp_since_epoch_clamps() {
        assert_eq!(Timestamp::since_epoch(Duration::from_secs(2)), Timestamp::from_millis(2_000));
        assert_eq!(Timestamp::since_epoch(Duration::MAX), Timestamp::from_millis(i64::MAX));
        assert!(Timestamp::now() > Timestamp::from_millis(1_577_836_800_000));
    }

    #[test]
    fn test_timestamp_saturates() {
        let t = Timestamp::from_millis(i64::MAX - 1);
        assert_eq!(t.saturating_add(Duration::from_secs(10)), Timestamp::from_millis(i64::MAX));
    }
}
