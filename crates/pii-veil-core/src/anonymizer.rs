//! Anonymization engine
//!
//! Walks resolved spans left to right, copying untouched text through and
//! splicing in each operator's output. A running offset delta maps every
//! original coordinate into the new text, and each transformation is reported
//! as an [`AnonymizationRecord`] in both coordinate spaces.

use crate::error::EngineResult;
use crate::registry::OperatorRegistry;
use crate::spans::{resolve_spans, DetectedSpan};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Where one transformation landed. Persist these to deanonymize exactly later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizationRecord {
    pub entity_type: String,
    pub original_start: usize,
    pub original_end: usize,
    pub new_start: usize,
    pub new_end: usize,
    pub operator_applied: String,
}

impl AnonymizationRecord {
    pub fn original_len(&self) -> usize {
        self.original_end - self.original_start
    }

    pub fn new_len(&self) -> usize {
        self.new_end - self.new_start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizationResult {
    pub text: String,
    pub records: Vec<AnonymizationRecord>,
}

impl AnonymizationResult {
    pub fn has_transformations(&self) -> bool {
        !self.records.is_empty()
    }

    /// The replacement text each record produced, in record order.
    pub fn replacements(&self) -> impl Iterator<Item = (&AnonymizationRecord, &str)> {
        self.records
            .iter()
            .map(move |record| (record, &self.text[record.new_start..record.new_end]))
    }
}

#[derive(Debug, Clone)]
pub struct AnonymizerEngine {
    registry: Arc<OperatorRegistry>,
}

impl AnonymizerEngine {
    pub fn new(registry: OperatorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn with_shared_registry(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// Anonymizes `text`. All-or-nothing: any invalid span or operator failure
    /// fails the call and no partial text is returned.
    pub fn anonymize(&self, text: &str, spans: &[DetectedSpan]) -> EngineResult<AnonymizationResult> {
        let resolved = resolve_spans(text, spans)?;

        let mut output = String::with_capacity(text.len());
        let mut records = Vec::with_capacity(resolved.len());
        let mut cursor = 0usize;
        let mut delta: isize = 0;

        for span in &resolved {
            output.push_str(&text[cursor..span.start]);
            let original = &text[span.start..span.end];

            let operator = match self.registry.resolve(&span.entity_type) {
                Some(operator) => operator,
                None => {
                    debug!(
                        "No operator for '{}' at {}..{}, passing through",
                        span.entity_type, span.start, span.end
                    );
                    output.push_str(original);
                    cursor = span.end;
                    continue;
                }
            };

            let replacement = operator.apply(&span.entity_type, original)?;
            let new_start = (span.start as isize + delta) as usize;
            debug_assert_eq!(new_start, output.len());
            output.push_str(&replacement);
            let new_end = new_start + replacement.len();

            delta += replacement.len() as isize - span.len() as isize;
            debug!(
                "Applied {} to '{}' at {}..{} -> {}..{} ({} -> {} bytes)",
                operator.name(),
                span.entity_type,
                span.start,
                span.end,
                new_start,
                new_end,
                span.len(),
                replacement.len()
            );

            records.push(AnonymizationRecord {
                entity_type: span.entity_type.clone(),
                original_start: span.start,
                original_end: span.end,
                new_start,
                new_end,
                operator_applied: operator.name().to_string(),
            });
            cursor = span.end;
        }

        output.push_str(&text[cursor..]);

        debug!(
            "Anonymized text: {} spans in, {} records out, length {} -> {}",
            spans.len(),
            records.len(),
            text.len(),
            output.len()
        );

        Ok(AnonymizationResult { text: output, records })
    }
}
