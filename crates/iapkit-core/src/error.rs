//! Error types for iapkit core.

use thiserror::Error;

use crate::receipt::ReceiptStatus;

/// Errors that can occur while interpreting receipt data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiptError {
    #[error("no receipt data")]
    NoReceiptData,

    #[error("receipt json could not be decoded: {0}")]
    JsonDecode(String),

    #[error("receipt rejected by validator with status {status}")]
    ReceiptInvalid { status: ReceiptStatus },

    #[error("purchase record is missing field {0}")]
    MissingField(&'static str),

    #[error("purchase record has invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

impl From<serde_json::Error> for ReceiptError {
    fn from(e: serde_json::Error) -> Self {
        ReceiptError::JsonDecode(e.to_string())
    }
}
