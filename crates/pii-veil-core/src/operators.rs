//! Anonymization operators
//!
//! Operators form a closed set. Each variant transforms an original substring
//! into its replacement; only [`Operator::Decrypt`] can run the other way.

use crate::crypto::{self, EncryptionKey};
use crate::error::{DecodeFailureReason, EngineError, EngineResult};
use crate::faker::{FakeKind, FakeValueGenerator};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Keep,
    Mask {
        masking_char: char,
        chars_to_mask: usize,
        from_end: bool,
    },
    Replace {
        new_value: String,
    },
    Redact,
    Hash {
        algorithm: HashAlgorithm,
    },
    /// Tokens are reproducible when `deterministic` is set; see [`crate::crypto`].
    Encrypt {
        key: EncryptionKey,
        deterministic: bool,
    },
    Decrypt {
        key: EncryptionKey,
    },
    Fake {
        kind: FakeKind,
        generator: FakeValueGenerator,
    },
}

impl Operator {
    pub fn mask(masking_char: char, chars_to_mask: usize, from_end: bool) -> Self {
        Self::Mask {
            masking_char,
            chars_to_mask,
            from_end,
        }
    }

    pub fn replace(new_value: impl Into<String>) -> Self {
        Self::Replace {
            new_value: new_value.into(),
        }
    }

    pub fn encrypt(key: EncryptionKey) -> Self {
        Self::Encrypt {
            key,
            deterministic: true,
        }
    }

    pub fn decrypt(key: EncryptionKey) -> Self {
        Self::Decrypt { key }
    }

    pub fn fake(kind: FakeKind, seed: u64) -> Self {
        Self::Fake {
            kind,
            generator: FakeValueGenerator::new(seed),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Mask { .. } => "mask",
            Self::Replace { .. } => "replace",
            Self::Redact => "redact",
            Self::Hash { .. } => "hash",
            Self::Encrypt { .. } => "encrypt",
            Self::Decrypt { .. } => "decrypt",
            Self::Fake { .. } => "fake",
        }
    }

    pub fn is_reversible(&self) -> bool {
        matches!(self, Self::Decrypt { .. })
    }

    /// Name of the anonymizing operator this one inverts, if any.
    pub fn inverts(&self) -> Option<&'static str> {
        match self {
            Self::Decrypt { .. } => Some("encrypt"),
            _ => None,
        }
    }

    /// Pattern that finds this operator's inverse-able output inside anonymized text.
    pub fn locate_pattern(&self) -> Option<&'static Regex> {
        match self {
            Self::Decrypt { .. } => Some(crypto::locate_pattern()),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<&EncryptionKey> {
        match self {
            Self::Encrypt { key, .. } | Self::Decrypt { key } => Some(key),
            _ => None,
        }
    }

    /// Transforms an original substring. Operators only ever see original text.
    pub fn apply(&self, entity_type: &str, original: &str) -> EngineResult<String> {
        match self {
            Self::Keep => Ok(original.to_string()),
            Self::Mask {
                masking_char,
                chars_to_mask,
                from_end,
            } => Ok(mask(original, *masking_char, *chars_to_mask, *from_end)),
            Self::Replace { new_value } => Ok(new_value.clone()),
            Self::Redact => Ok(String::new()),
            Self::Hash { algorithm } => Ok(hash(original, *algorithm)),
            Self::Encrypt { key, deterministic } => {
                key.encrypt(original, *deterministic)
                    .map_err(|e| EngineError::OperatorFailure {
                        entity_type: entity_type.to_string(),
                        cause: e.to_string(),
                    })
            }
            Self::Decrypt { .. } => Err(EngineError::OperatorFailure {
                entity_type: entity_type.to_string(),
                cause: "decrypt is a deanonymization operator and cannot anonymize".to_string(),
            }),
            Self::Fake { kind, generator } => Ok(generator.generate(*kind, original)),
        }
    }

    /// Recovers an original value from this operator's counterpart output.
    ///
    /// `Ok(Err(_))` is a per-region decode failure; `Err(_)` means the operator
    /// has no inverse at all, which is a configuration problem.
    pub fn invert(
        &self,
        entity_type: &str,
        anonymized: &str,
    ) -> EngineResult<Result<String, DecodeFailureReason>> {
        match self {
            Self::Decrypt { key } => Ok(key.decrypt(anonymized)),
            other => Err(EngineError::configuration(format!(
                "operator '{}' bound to '{}' has no inverse",
                other.name(),
                entity_type
            ))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mask {
                masking_char,
                chars_to_mask,
                from_end,
            } => write!(
                f,
                "mask(char='{}', count={}, from_end={})",
                masking_char, chars_to_mask, from_end
            ),
            Self::Replace { new_value } => write!(f, "replace('{}')", new_value),
            Self::Hash { algorithm } => write!(f, "hash({:?})", algorithm),
            Self::Encrypt { key, deterministic } => write!(
                f,
                "encrypt(key={}, bits={}, deterministic={})",
                key.fingerprint(),
                key.len() * 8,
                deterministic
            ),
            Self::Decrypt { key } => write!(f, "decrypt(key={}, bits={})", key.fingerprint(), key.len() * 8),
            Self::Fake { kind, .. } => write!(f, "fake({})", kind),
            other => f.write_str(other.name()),
        }
    }
}

fn mask(original: &str, masking_char: char, chars_to_mask: usize, from_end: bool) -> String {
    let total = original.chars().count();
    let masked = chars_to_mask.min(total);
    let masked_range = if from_end {
        (total - masked)..total
    } else {
        0..masked
    };

    original
        .chars()
        .enumerate()
        .map(|(i, c)| if masked_range.contains(&i) { masking_char } else { c })
        .collect()
}

fn hash(original: &str, algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => to_hex(&Sha256::digest(original.as_bytes())),
        HashAlgorithm::Sha512 => to_hex(&Sha512::digest(original.as_bytes())),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
