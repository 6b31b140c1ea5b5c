pub mod anonymizer;
pub mod config;
pub mod crypto;
pub mod deanonymizer;
pub mod detection;
pub mod error;
pub mod faker;
pub mod operators;
pub mod registry;
pub mod spans;
pub mod store;


pub use anonymizer::{AnonymizationRecord, AnonymizationResult, AnonymizerEngine};
pub use config::{Config, DetectionConfig, EncryptionConfig, FakerConfig, StoreConfig};
pub use crypto::EncryptionKey;
pub use deanonymizer::{DeanonymizationResult, DeanonymizerEngine, RecoveredRegion};
pub use detection::RegexDetectionEngine;
pub use error::{DecodeFailure, DecodeFailureReason, EngineError, EngineResult};
pub use faker::{FakeKind, FakeValueGenerator};
pub use operators::{HashAlgorithm, Operator};
pub use registry::{OperatorRegistry, OperatorSpec, SpecDefaults};
pub use spans::{resolve_spans, validate_span, DetectedSpan};
pub use store::{RecordStore, StoreStatistics};
