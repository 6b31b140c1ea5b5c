//! Entity type to operator bindings
//!
//! A registry is built once from configuration, validated at construction and
//! read-only afterwards. Entity types without a binding pass through unchanged.

use crate::crypto::EncryptionKey;
use crate::error::{EngineError, EngineResult};
use crate::faker::FakeKind;
use crate::operators::{HashAlgorithm, Operator};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Operator binding as written in configuration, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "lowercase")]
pub enum OperatorSpec {
    Keep,
    Mask {
        masking_char: String,
        chars_to_mask: i64,
        #[serde(default)]
        from_end: bool,
    },
    Replace {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_value: Option<String>,
    },
    Redact,
    Hash {
        #[serde(default)]
        hash_type: HashAlgorithm,
    },
    Encrypt {
        /// Base64 key; falls back to the configured process key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deterministic: Option<bool>,
    },
    Decrypt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Fake {
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
    },
}

/// Process-wide defaults an [`OperatorSpec`] may fall back on.
#[derive(Debug, Clone, Default)]
pub struct SpecDefaults {
    pub key: Option<EncryptionKey>,
    pub deterministic: bool,
    pub fake_seed: u64,
}

impl OperatorSpec {
    pub fn build(&self, entity_type: &str, defaults: &SpecDefaults) -> EngineResult<Operator> {
        match self {
            Self::Keep => Ok(Operator::Keep),
            Self::Mask {
                masking_char,
                chars_to_mask,
                from_end,
            } => {
                let mut chars = masking_char.chars();
                let masking_char = match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(EngineError::configuration(format!(
                            "mask for '{}' needs exactly one masking character, got '{}'",
                            entity_type, masking_char
                        )))
                    }
                };
                let chars_to_mask = usize::try_from(*chars_to_mask).map_err(|_| {
                    EngineError::configuration(format!(
                        "mask for '{}' has negative chars_to_mask {}",
                        entity_type, chars_to_mask
                    ))
                })?;
                Ok(Operator::mask(masking_char, chars_to_mask, *from_end))
            }
            Self::Replace { new_value } => match new_value {
                Some(value) => Ok(Operator::replace(value.clone())),
                None => Err(EngineError::configuration(format!(
                    "replace for '{}' requires new_value",
                    entity_type
                ))),
            },
            Self::Redact => Ok(Operator::Redact),
            Self::Hash { hash_type } => Ok(Operator::Hash { algorithm: *hash_type }),
            Self::Encrypt { key, deterministic } => Ok(Operator::Encrypt {
                key: resolve_key(entity_type, key.as_deref(), defaults)?,
                deterministic: deterministic.unwrap_or(defaults.deterministic),
            }),
            Self::Decrypt { key } => Ok(Operator::Decrypt {
                key: resolve_key(entity_type, key.as_deref(), defaults)?,
            }),
            Self::Fake { kind, seed } => {
                let kind: FakeKind = kind.parse().map_err(|e| {
                    EngineError::configuration(format!("fake for '{}': {}", entity_type, e))
                })?;
                Ok(Operator::fake(kind, seed.unwrap_or(defaults.fake_seed)))
            }
        }
    }
}

fn resolve_key(entity_type: &str, encoded: Option<&str>, defaults: &SpecDefaults) -> EngineResult<EncryptionKey> {
    match encoded {
        Some(encoded) => {
            let material = STANDARD.decode(encoded.trim()).map_err(|e| {
                EngineError::configuration(format!("key for '{}' is not valid base64: {}", entity_type, e))
            })?;
            EncryptionKey::new(&material)
        }
        None => defaults.key.clone().ok_or_else(|| {
            EngineError::configuration(format!("no encryption key available for '{}'", entity_type))
        }),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorRegistry {
    bindings: BTreeMap<String, Operator>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operators<I, S>(bindings: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (S, Operator)>,
        S: Into<String>,
    {
        bindings
            .into_iter()
            .try_fold(Self::new(), |registry, (entity_type, operator)| registry.bind(entity_type, operator))
    }

    pub fn from_specs<'a, I>(specs: I, defaults: &SpecDefaults) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a OperatorSpec)>,
    {
        specs.into_iter().try_fold(Self::new(), |registry, (entity_type, spec)| {
            let operator = spec.build(entity_type, defaults)?;
            registry.bind(entity_type.clone(), operator)
        })
    }

    /// Adds a binding after validating it.
    pub fn bind(mut self, entity_type: impl Into<String>, operator: Operator) -> EngineResult<Self> {
        let entity_type = entity_type.into();
        if entity_type.is_empty() {
            return Err(EngineError::configuration("entity type must not be empty"));
        }
        if let Some(key) = operator.key() {
            if !crate::crypto::VALID_KEY_LENGTHS.contains(&key.len()) {
                return Err(EngineError::InvalidKeyLength { len: key.len() });
            }
        }

        debug!("Bound '{}' to {}", entity_type, operator);
        self.bindings.insert(entity_type, operator);
        Ok(self)
    }

    pub fn resolve(&self, entity_type: &str) -> Option<&Operator> {
        self.bindings.get(entity_type)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings in entity type order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Operator)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn reversible_entity_types(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, op)| op.is_reversible())
            .map(|(entity_type, _)| entity_type)
            .collect()
    }
}
