//! PII detection engine using regex pattern matching
//!
//! Produces [`DetectedSpan`]s for the anonymizer. Overlapping matches between
//! patterns are left in place; the anonymizer resolves them.

use crate::config::DetectionConfig;
use crate::spans::DetectedSpan;
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub fn default_patterns() -> BTreeMap<String, String> {
    [
        ("EMAIL_ADDRESS", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        ("PHONE_NUMBER", r"\b\d{3}[-. ]\d{3}[-. ]\d{4}\b|\b\d{3}-\d{4}\b"),
        ("CREDIT_CARD", r"\b(?:\d{4}[- ]?){3}\d{4}\b"),
        ("SSN", r"\b\d{3}-\d{2}-\d{4}\b"),
        (
            "IP_ADDRESS",
            r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
        ),
        ("NIF_CODE", r"\b\d{8}[A-Z]\b"),
        (
            "DATE_OF_BIRTH",
            r"\b(?:0[1-9]|1[0-2])/(?:0[1-9]|[12][0-9]|3[01])/(?:19|20)\d{2}\b",
        ),
    ]
    .into_iter()
    .map(|(name, pattern)| (name.to_string(), pattern.to_string()))
    .collect()
}

#[derive(Debug, Clone)]
pub struct RegexDetectionEngine {
    patterns: BTreeMap<String, Regex>,
    confidence_threshold: f64,
    language: String,
}

impl RegexDetectionEngine {
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let mut patterns = BTreeMap::new();

        for (name, pattern_str) in &config.patterns {
            match Regex::new(pattern_str) {
                Ok(regex) => {
                    patterns.insert(name.clone(), regex);
                    debug!("Loaded regex pattern for '{}'", name);
                }
                Err(e) => {
                    warn!("Invalid regex pattern for '{}': {}", name, e);
                    return Err(anyhow::anyhow!("Invalid regex pattern for '{}': {}", name, e));
                }
            }
        }

        info!(
            "Regex detection ready: {} patterns, language '{}', threshold {:.2}",
            patterns.len(),
            config.language,
            config.confidence_threshold
        );

        Ok(Self {
            patterns,
            confidence_threshold: config.confidence_threshold,
            language: config.language.clone(),
        })
    }

    /// Language tag of the configured text. The patterns themselves are
    /// language-neutral.
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(String::as_str)
    }

    /// Runs every configured pattern over `text`.
    pub fn detect(&self, text: &str) -> Vec<DetectedSpan> {
        self.detect_matching(text, |_| true)
    }

    /// Runs only the patterns for the listed entity types.
    pub fn detect_entities(&self, text: &str, entities: &[String]) -> Vec<DetectedSpan> {
        self.detect_matching(text, |entity_type| entities.iter().any(|e| e == entity_type))
    }

    fn detect_matching(&self, text: &str, wanted: impl Fn(&str) -> bool) -> Vec<DetectedSpan> {
        let mut spans = Vec::new();

        for (entity_type, regex) in self.patterns.iter().filter(|(name, _)| wanted(name)) {
            for mat in regex.find_iter(text) {
                if mat.is_empty() {
                    continue;
                }
                let score = calculate_confidence(entity_type, mat.as_str());
                if score >= self.confidence_threshold {
                    spans.push(DetectedSpan::new(entity_type.clone(), mat.start(), mat.end(), score));
                }
            }
        }

        spans.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));
        debug!("Detected {} spans in {} bytes of text", spans.len(), text.len());
        spans
    }
}

// This is a simple heuristic. A proper NLP recognizer would be needed for
// higher accuracy.
fn calculate_confidence(entity_type: &str, text: &str) -> f64 {
    let digit_count = text.chars().filter(|c| c.is_ascii_digit()).count();

    match entity_type {
        "EMAIL_ADDRESS" => {
            if text.contains('@') && text.contains('.') {
                0.95
            } else {
                0.7
            }
        }
        "PHONE_NUMBER" => {
            if digit_count >= 10 {
                0.9
            } else if digit_count >= 7 {
                0.8
            } else {
                0.6
            }
        }
        "SSN" => {
            if text.matches('-').count() == 2 {
                0.95
            } else {
                0.8
            }
        }
        "CREDIT_CARD" => {
            if passes_luhn(text) {
                0.95
            } else {
                0.6
            }
        }
        "IP_ADDRESS" => {
            let parts: Vec<&str> = text.split('.').collect();
            if parts.len() == 4 && parts.iter().all(|&p| p.parse::<u8>().is_ok()) {
                0.95
            } else {
                0.7
            }
        }
        "NIF_CODE" => {
            if valid_nif_letter(text) {
                0.95
            } else {
                0.6
            }
        }
        _ => 0.85,
    }
}

fn passes_luhn(text: &str) -> bool {
    let digits: Vec<u32> = text.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn valid_nif_letter(text: &str) -> bool {
    const LETTERS: &[u8] = b"TRWAGMYFPDXBNJZSQVHLCKE";

    let Some((split, letter)) = text.char_indices().last() else {
        return false;
    };
    match text[..split].parse::<u32>() {
        Ok(n) => char::from(LETTERS[(n % 23) as usize]) == letter,
        Err(_) => false,
    }
}
