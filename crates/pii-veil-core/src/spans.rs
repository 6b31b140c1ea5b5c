//! Detected spans and overlap resolution
//!
//! Spans arrive from an external recognizer, unordered and possibly
//! overlapping. [`resolve_spans`] validates them and returns a left-to-right,
//! non-overlapping sequence for the anonymizer to walk.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// A recognizer hit: half-open byte range `start..end` into the original text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSpan {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

impl DetectedSpan {
    pub fn new(entity_type: impl Into<String>, start: usize, end: usize, score: f64) -> Self {
        Self {
            entity_type: entity_type.into(),
            start,
            end,
            score,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &DetectedSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

pub fn validate_span(text: &str, span: &DetectedSpan) -> EngineResult<()> {
    if span.start == span.end {
        return Err(EngineError::invalid_span(span.start, span.end, "zero-length span"));
    }
    if span.start > span.end {
        return Err(EngineError::invalid_span(span.start, span.end, "start is after end"));
    }
    if span.end > text.len() {
        return Err(EngineError::invalid_span(
            span.start,
            span.end,
            format!("end exceeds text length {}", text.len()),
        ));
    }
    if !text.is_char_boundary(span.start) || !text.is_char_boundary(span.end) {
        return Err(EngineError::invalid_span(span.start, span.end, "offset is not on a character boundary"));
    }
    if !(0.0..=1.0).contains(&span.score) {
        return Err(EngineError::invalid_span(
            span.start,
            span.end,
            format!("score {} is outside [0, 1]", span.score),
        ));
    }
    if span.entity_type.is_empty() {
        return Err(EngineError::invalid_span(span.start, span.end, "empty entity type"));
    }
    Ok(())
}

fn priority_order(a: &DetectedSpan, b: &DetectedSpan) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.start.cmp(&b.start))
        .then_with(|| a.entity_type.cmp(&b.entity_type))
        .then_with(|| a.end.cmp(&b.end))
}

/// Index at which `span` would be inserted into `kept`, or `None` if it
/// overlaps a kept span. `kept` is sorted by start and free of overlaps, so
/// only the neighbours around the insertion point can collide.
fn insertion_point(kept: &[DetectedSpan], span: &DetectedSpan) -> Option<usize> {
    let at = kept.partition_point(|k| k.start < span.start);
    let before = at.checked_sub(1).map(|i| &kept[i]);
    let after = kept.get(at);
    if before.into_iter().chain(after).any(|k| k.overlaps(span)) {
        None
    } else {
        Some(at)
    }
}

/// Validates every span, then resolves overlaps.
///
/// Spans are accepted greedily in `(score desc, start asc, entity_type asc)`
/// order; a span is kept only if it overlaps no already-kept span. The result
/// is returned sorted by start.
pub fn resolve_spans(text: &str, spans: &[DetectedSpan]) -> EngineResult<Vec<DetectedSpan>> {
    for span in spans {
        validate_span(text, span)?;
    }

    let mut sorted: Vec<&DetectedSpan> = spans.iter().collect();
    sorted.sort_by(|a, b| priority_order(a, b));

    let mut kept: Vec<DetectedSpan> = Vec::with_capacity(sorted.len());
    let mut dropped = 0usize;

    for span in sorted {
        match insertion_point(&kept, span) {
            Some(at) => kept.insert(at, span.clone()),
            None => {
                debug!(
                    "Dropping overlapping span {} {}..{} (score {:.2})",
                    span.entity_type, span.start, span.end, span.score
                );
                dropped += 1;
            }
        }
    }

    debug!("Resolved {} spans into {} ({} dropped)", spans.len(), kept.len(), dropped);
    Ok(kept)
}
