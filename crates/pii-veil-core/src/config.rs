//! Configuration management for pii-veil

use crate::crypto::EncryptionKey;
use crate::detection::default_patterns;
use crate::error::{EngineError, EngineResult};
use crate::registry::{OperatorRegistry, OperatorSpec, SpecDefaults};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_KEY_SEED: &str = "pii_veil_demo_key_2024";
pub const IN_MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub faker: FakerConfig,
    pub detection: DetectionConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub anonymize: BTreeMap<String, OperatorSpec>,
    #[serde(default)]
    pub deanonymize: BTreeMap<String, OperatorSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Demo key derivation: the key is SHA-256 of this seed.
    pub key_seed: String,
    /// Base64 raw key (16, 24 or 32 bytes). Takes precedence over `key_seed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default = "default_true")]
    pub deterministic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakerConfig {
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Language tag of the input text, reported by the detection engine.
    pub language: String,
    pub confidence_threshold: f64,
    pub patterns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    /// Stored documents older than this are purged when the store opens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for FakerConfig {
    fn default() -> Self {
        Self { seed: 12345 }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            confidence_threshold: 0.8,
            patterns: default_patterns(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let replace = |value: &str| OperatorSpec::Replace {
            new_value: Some(value.to_string()),
        };

        let mut anonymize = BTreeMap::new();
        anonymize.insert("PERSON".to_string(), OperatorSpec::Keep);
        anonymize.insert(
            "PHONE_NUMBER".to_string(),
            OperatorSpec::Mask {
                masking_char: "X".to_string(),
                chars_to_mask: 9,
                from_end: true,
            },
        );
        anonymize.insert("EMAIL_ADDRESS".to_string(), replace("[HIDDEN_EMAIL]"));
        anonymize.insert("NIF_CODE".to_string(), replace("[HIDDEN_ID]"));
        anonymize.insert("US_DRIVER_LICENSE".to_string(), replace("[HIDDEN_DRIVER_LICENSE]"));
        anonymize.insert("SSN".to_string(), replace("[HIDDEN_SSN]"));
        anonymize.insert(
            "CREDIT_CARD".to_string(),
            OperatorSpec::Encrypt {
                key: None,
                deterministic: None,
            },
        );

        let mut deanonymize = BTreeMap::new();
        deanonymize.insert("CREDIT_CARD".to_string(), OperatorSpec::Decrypt { key: None });

        Self {
            encryption: EncryptionConfig {
                key_seed: DEFAULT_KEY_SEED.to_string(),
                key: None,
                deterministic: true,
            },
            faker: FakerConfig::default(),
            detection: DetectionConfig::default(),
            store: StoreConfig {
                database_path: PathBuf::from("records.db"),
                retention_days: Some(90),
            },
            anonymize,
            deanonymize,
        }
    }
}

impl Config {
    pub fn get_app_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "pii-veil", "pii-veil")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine application directories"))
    }

    pub fn resolve_paths(&mut self) -> Result<()> {
        let path = &self.store.database_path;
        if path.as_os_str() == IN_MEMORY_DATABASE || !path.is_relative() {
            return Ok(());
        }

        let project_dirs = Self::get_app_dirs()?;
        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        self.store.database_path = data_dir.join(path);
        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.resolve_paths()?;
        Ok(config)
    }

    pub fn get_default_config_path() -> Result<PathBuf> {
        let project_dirs = Self::get_app_dirs()?;
        let config_dir = project_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.join("pii-veil.toml"))
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Checks the configuration and returns the process key derived from it.
    pub fn validate(&self) -> Result<EncryptionKey> {
        for (name, pattern) in &self.detection.patterns {
            regex::Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("Invalid regex pattern for '{}': {}", name, e))?;
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow::anyhow!("Confidence threshold must be between 0.0 and 1.0"));
        }

        let key = self.encryption_key().context("Invalid [encryption] section")?;
        self.anonymization_registry(&key)
            .context("Invalid [anonymize] operator bindings")?;
        self.deanonymization_registry(&key)
            .context("Invalid [deanonymize] operator bindings")?;

        if let Some(parent) = self.store.database_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(key)
    }

    /// The process key: the explicit base64 key if set, else derived from `key_seed`.
    pub fn encryption_key(&self) -> EngineResult<EncryptionKey> {
        match &self.encryption.key {
            Some(encoded) => {
                let material = STANDARD.decode(encoded.trim()).map_err(|e| {
                    EngineError::configuration(format!("encryption key is not valid base64: {}", e))
                })?;
                EncryptionKey::new(&material)
            }
            None => EncryptionKey::from_seed(&self.encryption.key_seed),
        }
    }

    fn spec_defaults(&self, key: &EncryptionKey) -> SpecDefaults {
        SpecDefaults {
            key: Some(key.clone()),
            deterministic: self.encryption.deterministic,
            fake_seed: self.faker.seed,
        }
    }

    /// Builds the `[anonymize]` registry; encrypt bindings use `key`.
    pub fn anonymization_registry(&self, key: &EncryptionKey) -> EngineResult<OperatorRegistry> {
        OperatorRegistry::from_specs(&self.anonymize, &self.spec_defaults(key))
    }

    pub fn deanonymization_registry(&self, key: &EncryptionKey) -> EngineResult<OperatorRegistry> {
        OperatorRegistry::from_specs(&self.deanonymize, &self.spec_defaults(key))
    }
}
