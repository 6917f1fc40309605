//! Error types for sale decoding
//!
//! Error taxonomy using thiserror. Decoding failures are never fatal to a
//! consumer: the offending payload is logged and skipped.

use thiserror::Error;

/// Failure to turn a raw stream payload into a `SaleEvent`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Payload is not a record: found {found}")]
    NotARecord { found: &'static str },

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DecodeError {
    /// Short label for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Empty => "empty",
            DecodeError::Malformed(_) => "malformed",
            DecodeError::NotARecord { .. } => "not_a_record",
            DecodeError::InvalidField { .. } => "invalid_field",
        }
    }
}
