//! Error taxonomy for the anonymization and deanonymization engines

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failures that abort a whole engine call.
///
/// Per-region deanonymization failures are not represented here: they are
/// collected as [`DecodeFailure`] values and returned alongside whatever was
/// recovered.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid span {start}..{end}: {reason}")]
    InvalidSpan {
        start: usize,
        end: usize,
        reason: String,
    },

    #[error("invalid key length: {len} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength { len: usize },

    #[error("operator failed for entity type '{entity_type}': {cause}")]
    OperatorFailure { entity_type: String, cause: String },

    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl EngineError {
    pub(crate) fn invalid_span(start: usize, end: usize, reason: impl Into<String>) -> Self {
        Self::InvalidSpan {
            start,
            end,
            reason: reason.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum DecodeFailureReason {
    /// Not valid base64, or shorter than the smallest possible token.
    MalformedToken,
    UnsupportedVersion(u8),
    /// Wrong key or corrupted ciphertext.
    AuthenticationFailed,
    InvalidUtf8,
    /// Record coordinates do not fit the supplied text.
    OutOfBounds,
}

impl DecodeFailureReason {
    /// The region decoded as a well-formed token and was rejected by the cipher.
    pub fn reached_cipher(&self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::InvalidUtf8)
    }
}

impl fmt::Display for DecodeFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedToken => write!(f, "malformed token"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported token version {}", v),
            Self::AuthenticationFailed => write!(f, "authentication failed (wrong key or corrupted ciphertext)"),
            Self::InvalidUtf8 => write!(f, "decrypted value is not valid UTF-8"),
            Self::OutOfBounds => write!(f, "region lies outside the text"),
        }
    }
}

/// A candidate region of anonymized text that could not be inverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeFailure {
    pub start: usize,
    pub end: usize,
    pub entity_type: Option<String>,
    pub reason: DecodeFailureReason,
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity_type {
            Some(entity_type) => write!(f, "{}..{} ({}): {}", self.start, self.end, entity_type, self.reason),
            None => write!(f, "{}..{}: {}", self.start, self.end, self.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_messages() {
        let err = EngineError::OperatorFailure {
            entity_type: "CREDIT_CARD".to_string(),
            cause: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "operator failed for entity type 'CREDIT_CARD': boom");

        let err = EngineError::InvalidKeyLength { len: 7 };
        assert!(err.to_string().contains("7 bytes"));

        let err = EngineError::invalid_span(3, 3, "zero-length span");
        assert_eq!(err.to_string(), "invalid span 3..3: zero-length span");
    }

    #[test]
    fn test_decode_failure_display() {
        let failure = DecodeFailure {
            start: 5,
            end: 50,
            entity_type: Some("CREDIT_CARD".to_string()),
            reason: DecodeFailureReason::AuthenticationFailed,
        };
        assert!(failure.to_string().starts_with("5..50 (CREDIT_CARD)"));
    }

    #[test]
    fn test_decode_failure_serializes_reason() {
        let failure = DecodeFailure {
            start: 0,
            end: 41,
            entity_type: None,
            reason: DecodeFailureReason::UnsupportedVersion(2),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["reason"]["kind"], "unsupported_version");
        assert_eq!(json["reason"]["detail"], 2);
    }
}
