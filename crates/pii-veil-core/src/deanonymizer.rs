//! Deanonymization engine
//!
//! Two entry points:
//!
//! - [`DeanonymizerEngine::deanonymize_with_records`] replays persisted
//!   [`AnonymizationRecord`]s and inverts exactly the regions they describe.
//!   Prefer it whenever the records were kept.
//! - [`DeanonymizerEngine::deanonymize`] works from the anonymized text alone,
//!   scanning for each reversible operator's locate pattern. Best effort only.
//!
//! Both collect per-region failures instead of aborting; only configuration
//! problems (an operator without an inverse, a missing binding) fail the call.

use crate::anonymizer::AnonymizationRecord;
use crate::crypto::MIN_TOKEN_LEN;
use crate::error::{DecodeFailure, DecodeFailureReason, EngineError, EngineResult};
use crate::operators::Operator;
use crate::registry::OperatorRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredRegion {
    pub entity_type: String,
    /// Byte range of the token in the anonymized input.
    pub anonymized_start: usize,
    pub anonymized_end: usize,
    /// Byte range of the restored value in the output text.
    pub recovered_start: usize,
    pub recovered_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeanonymizationResult {
    pub text: String,
    pub recovered: Vec<RecoveredRegion>,
    pub unrecovered: Vec<DecodeFailure>,
}

impl DeanonymizationResult {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            recovered: Vec::new(),
            unrecovered: Vec::new(),
        }
    }

    /// No reversible region was found or attempted.
    pub fn nothing_to_recover(&self) -> bool {
        self.recovered.is_empty() && self.unrecovered.is_empty()
    }

    /// Every attempted region was recovered.
    pub fn is_complete(&self) -> bool {
        self.unrecovered.is_empty()
    }
}

struct Candidate<'r> {
    start: usize,
    end: usize,
    inverses: Vec<(&'r str, &'r Operator)>,
}

/// Accumulates the output text while tracking the offset delta between the
/// anonymized input and the recovered output.
struct Splicer<'t> {
    input: &'t str,
    output: String,
    cursor: usize,
    delta: isize,
    recovered: Vec<RecoveredRegion>,
    unrecovered: Vec<DecodeFailure>,
}

impl<'t> Splicer<'t> {
    fn new(input: &'t str) -> Self {
        Self {
            input,
            output: String::with_capacity(input.len()),
            cursor: 0,
            delta: 0,
            recovered: Vec::new(),
            unrecovered: Vec::new(),
        }
    }

    fn restore(&mut self, entity_type: &str, start: usize, end: usize, original: &str) {
        self.output.push_str(&self.input[self.cursor..start]);
        let recovered_start = (start as isize + self.delta) as usize;
        self.output.push_str(original);
        let recovered_end = recovered_start + original.len();
        self.delta += original.len() as isize - (end - start) as isize;
        self.cursor = end;

        debug!(
            "Recovered '{}' at {}..{} -> {}..{}",
            entity_type, start, end, recovered_start, recovered_end
        );
        self.recovered.push(RecoveredRegion {
            entity_type: entity_type.to_string(),
            anonymized_start: start,
            anonymized_end: end,
            recovered_start,
            recovered_end,
        });
    }

    fn fail(&mut self, entity_type: Option<&str>, start: usize, end: usize, reason: DecodeFailureReason) {
        warn!(
            "Could not recover region {}..{} ({}): {}",
            start,
            end,
            entity_type.unwrap_or("unattributed"),
            reason
        );
        self.unrecovered.push(DecodeFailure {
            start,
            end,
            entity_type: entity_type.map(str::to_string),
            reason,
        });
    }

    fn finish(mut self) -> DeanonymizationResult {
        self.output.push_str(&self.input[self.cursor..]);
        DeanonymizationResult {
            text: self.output,
            recovered: self.recovered,
            unrecovered: self.unrecovered,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeanonymizerEngine {
    registry: Arc<OperatorRegistry>,
}

impl DeanonymizerEngine {
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

    fn inverse_operators(&self) -> EngineResult<Vec<(&str, &Operator)>> {
        self.registry
            .iter()
            .map(|(entity_type, operator)| {
                if operator.is_reversible() {
                    Ok((entity_type, operator))
                } else {
                    Err(EngineError::configuration(format!(
                        "deanonymization binding for '{}' uses '{}', which has no inverse",
                        entity_type,
                        operator.name()
                    )))
                }
            })
            .collect()
    }

    /// Recovers reversible regions by scanning `text` for locate-pattern matches.
    pub fn deanonymize(&self, text: &str) -> EngineResult<DeanonymizationResult> {
        let inverses = self.inverse_operators()?;
        let candidates = collect_candidates(text, &inverses);

        if candidates.is_empty() {
            debug!("No reversible candidates found in {} bytes of text", text.len());
            return Ok(DeanonymizationResult::unchanged(text));
        }

        let mut splicer = Splicer::new(text);
        for candidate in &candidates {
            match invert_candidate(text, candidate)? {
                Ok((entity_type, start, original)) => {
                    splicer.restore(entity_type, start, candidate.end, &original);
                }
                Err((start, reason)) => {
                    let attributed = match candidate.inverses.as_slice() {
                        [(entity_type, _)] => Some(*entity_type),
                        _ => None,
                    };
                    splicer.fail(attributed, start, candidate.end, reason);
                }
            }
        }

        let result = splicer.finish();
        debug!(
            "Scan deanonymization: {} candidates, {} recovered, {} unrecovered",
            candidates.len(),
            result.recovered.len(),
            result.unrecovered.len()
        );
        Ok(result)
    }

    /// Recovers exactly the regions described by `records`.
    ///
    /// Records of irreversible operators are skipped. A record produced by an
    /// invertible operator with no matching binding is a configuration error.
    pub fn deanonymize_with_records(
        &self,
        text: &str,
        records: &[AnonymizationRecord],
    ) -> EngineResult<DeanonymizationResult> {
        self.inverse_operators()?;

        let mut invertible: Vec<(&AnonymizationRecord, &Operator)> = Vec::with_capacity(records.len());
        for record in records {
            match self.registry.resolve(&record.entity_type) {
                Some(operator) if operator.inverts() == Some(record.operator_applied.as_str()) => {
                    invertible.push((record, operator));
                }
                Some(_) | None if record.operator_applied == "encrypt" => {
                    return Err(EngineError::configuration(format!(
                        "no decrypt binding for encrypted entity type '{}'",
                        record.entity_type
                    )));
                }
                _ => {
                    debug!(
                        "Skipping irreversible record '{}' ({}) at {}..{}",
                        record.entity_type, record.operator_applied, record.new_start, record.new_end
                    );
                }
            }
        }
        invertible.sort_by_key(|(r, _)| (r.new_start, r.new_end));

        for pair in invertible.windows(2) {
            let (a, b) = (pair[0].0, pair[1].0);
            if a.new_end > b.new_start {
                return Err(EngineError::configuration(format!(
                    "records overlap at {}..{} and {}..{}",
                    a.new_start, a.new_end, b.new_start, b.new_end
                )));
            }
        }

        let mut splicer = Splicer::new(text);
        for (record, operator) in invertible {
            let in_bounds = record.new_start <= record.new_end
                && record.new_end <= text.len()
                && text.is_char_boundary(record.new_start)
                && text.is_char_boundary(record.new_end);
            if !in_bounds {
                splicer.fail(
                    Some(&record.entity_type),
                    record.new_start,
                    record.new_end,
                    DecodeFailureReason::OutOfBounds,
                );
                continue;
            }

            let token = &text[record.new_start..record.new_end];
            match operator.invert(&record.entity_type, token)? {
                Ok(original) => splicer.restore(&record.entity_type, record.new_start, record.new_end, &original),
                Err(reason) => splicer.fail(Some(&record.entity_type), record.new_start, record.new_end, reason),
            }
        }

        let result = splicer.finish();
        debug!(
            "Record deanonymization: {} records, {} recovered, {} unrecovered",
            records.len(),
            result.recovered.len(),
            result.unrecovered.len()
        );
        Ok(result)
    }
}

/// Inverts one candidate region, returning the entity type, the token start
/// and the restored value.
///
/// A match can include token-alphabet characters that precede the real token,
/// so every suffix still long enough to be a token is tried from the left. On
/// failure the region starts at the leftmost suffix that decoded as a
/// well-formed token, or at the match start if none did.
fn invert_candidate<'r>(
    text: &str,
    candidate: &Candidate<'r>,
) -> EngineResult<Result<(&'r str, usize, String), (usize, DecodeFailureReason)>> {
    let last_start = candidate.end.saturating_sub(MIN_TOKEN_LEN).max(candidate.start);
    let mut failure: Option<(usize, DecodeFailureReason)> = None;

    for start in candidate.start..=last_start {
        let token = &text[start..candidate.end];
        for &(entity_type, operator) in &candidate.inverses {
            match operator.invert(entity_type, token)? {
                Ok(original) => {
                    if start > candidate.start {
                        debug!(
                            "Token at {}..{} follows {} token-alphabet bytes",
                            start,
                            candidate.end,
                            start - candidate.start
                        );
                    }
                    return Ok(Ok((entity_type, start, original)));
                }
                Err(reason) => {
                    let replace = match &failure {
                        None => true,
                        Some((_, kept)) => !kept.reached_cipher() && reason.reached_cipher(),
                    };
                    if replace {
                        failure = Some((start, reason));
                    }
                }
            }
        }
    }

    Ok(Err(failure.unwrap_or((candidate.start, DecodeFailureReason::MalformedToken))))
}

/// Candidate regions in start order, each with the inverses whose pattern
/// matched it. Regions overlapping an earlier candidate are ignored.
fn collect_candidates<'r>(text: &str, inverses: &[(&'r str, &'r Operator)]) -> Vec<Candidate<'r>> {
    let mut by_region: BTreeMap<(usize, usize), Vec<(&'r str, &'r Operator)>> = BTreeMap::new();

    for &(entity_type, operator) in inverses {
        let Some(pattern) = operator.locate_pattern() else {
            continue;
        };
        for found in pattern.find_iter(text) {
            by_region
                .entry((found.start(), found.end()))
                .or_default()
                .push((entity_type, operator));
        }
    }

    let mut candidates: Vec<Candidate<'r>> = Vec::with_capacity(by_region.len());
    for ((start, end), inverses) in by_region {
        if candidates.last().is_some_and(|prev| start < prev.end) {
            continue;
        }
        candidates.push(Candidate { start, end, inverses });
    }
    candidates
}
