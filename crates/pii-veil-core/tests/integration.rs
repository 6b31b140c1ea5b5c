use pii_veil_core::{
    resolve_spans, AnonymizerEngine, Config, DeanonymizerEngine, DecodeFailureReason, DetectedSpan,
    EncryptionKey, EngineError, Operator, OperatorRegistry, RecordStore, RegexDetectionEngine,
};
use proptest::prelude::*;

const ENTITY_TYPES: [&str; 4] = ["CREDIT_CARD", "EMAIL_ADDRESS", "PERSON", "PHONE_NUMBER"];

fn key() -> EncryptionKey {
    EncryptionKey::from_seed("integration").unwrap()
}

fn mixed_registry() -> OperatorRegistry {
    OperatorRegistry::from_operators([
        ("CREDIT_CARD", Operator::encrypt(key())),
        ("EMAIL_ADDRESS", Operator::replace("[HIDDEN_EMAIL]")),
        ("PERSON", Operator::Redact),
        ("PHONE_NUMBER", Operator::mask('X', 4, true)),
    ])
    .unwrap()
}

fn encrypt_everything() -> OperatorRegistry {
    OperatorRegistry::from_operators(ENTITY_TYPES.map(|t| (t, Operator::encrypt(key())))).unwrap()
}

fn decrypt_everything() -> OperatorRegistry {
    OperatorRegistry::from_operators(ENTITY_TYPES.map(|t| (t, Operator::decrypt(key())))).unwrap()
}

fn floor_boundary(text: &str, mut i: usize) -> usize {
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, mut i: usize) -> usize {
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Arbitrary valid, possibly overlapping spans over `text`.
fn spans_over(text: &str, raw: &[(usize, usize, usize, u8)]) -> Vec<DetectedSpan> {
    if text.is_empty() {
        return Vec::new();
    }
    raw.iter()
        .filter_map(|&(start, len, kind, score)| {
            let start = floor_boundary(text, start % text.len());
            let end = ceil_boundary(text, (start + len).min(text.len()));
            (start < end).then(|| {
                DetectedSpan::new(ENTITY_TYPES[kind % ENTITY_TYPES.len()], start, end, score as f64 / 100.0)
            })
        })
        .collect()
}

fn raw_spans() -> impl Strategy<Value = Vec<(usize, usize, usize, u8)>> {
    prop::collection::vec((0usize..200, 1usize..24, 0usize..4, 0u8..=100), 0..10)
}

#[test]
fn test_module_exports() {
    let config = Config::default();

    let detection_engine = RegexDetectionEngine::new(&config.detection);
    assert!(detection_engine.is_ok());

    let key = config.encryption_key().unwrap();
    let anonymizer = AnonymizerEngine::new(config.anonymization_registry(&key).unwrap());
    assert_eq!(anonymizer.registry().len(), 7);

    let deanonymizer = DeanonymizerEngine::new(config.deanonymization_registry(&key).unwrap());
    assert_eq!(deanonymizer.registry().reversible_entity_types(), vec!["CREDIT_CARD"]);

    let mut store_config = config.store.clone();
    store_config.database_path = ":memory:".into();
    assert!(RecordStore::new(store_config).is_ok());
}

#[test]
fn test_pass_through_without_spans() {
    let engine = AnonymizerEngine::new(mixed_registry());
    let result = engine.anonymize("Nothing sensitive in here.", &[]).unwrap();

    assert_eq!(result.text, "Nothing sensitive in here.");
    assert!(result.records.is_empty());
}

#[test]
fn test_mask_scenario() {
    let engine = AnonymizerEngine::new(mixed_registry());
    let result = engine
        .anonymize("call me at 555-1234", &[DetectedSpan::new("PHONE_NUMBER", 11, 19, 0.9)])
        .unwrap();

    assert_eq!(result.text, "call me at 555-XXXX");
    assert_eq!(result.records[0].new_start, 11);
    assert_eq!(result.records[0].new_end, 19);
}

#[test]
fn test_encrypt_scenario() {
    let text = "card 4111111111111111";
    let spans = [DetectedSpan::new("CREDIT_CARD", 5, 21, 0.95)];
    let anonymized = AnonymizerEngine::new(mixed_registry()).anonymize(text, &spans).unwrap();

    let token = &anonymized.text[5..];
    let located = pii_veil_core::crypto::locate_pattern().find(&anonymized.text).unwrap();
    assert_eq!(located.as_str(), token);

    let deanonymizer = DeanonymizerEngine::new(
        OperatorRegistry::from_operators([("CREDIT_CARD", Operator::decrypt(key()))]).unwrap(),
    );
    let restored = deanonymizer.deanonymize(&anonymized.text).unwrap();
    assert_eq!(restored.text, text);
    assert_eq!(restored.recovered[0].recovered_start, 5);
    assert_eq!(restored.recovered[0].recovered_end, 21);

    let wrong = DeanonymizerEngine::new(
        OperatorRegistry::from_operators([(
            "CREDIT_CARD",
            Operator::decrypt(EncryptionKey::from_seed("wrong").unwrap()),
        )])
        .unwrap(),
    );
    let failed = wrong.deanonymize(&anonymized.text).unwrap();
    assert_eq!(failed.text, anonymized.text);
    assert_eq!(failed.unrecovered.len(), 1);
    assert_eq!(failed.unrecovered[0].start, 5);
    assert_eq!(failed.unrecovered[0].end, anonymized.text.len());
    assert_eq!(failed.unrecovered[0].reason, DecodeFailureReason::AuthenticationFailed);
}

#[test]
fn test_overlap_scenario() {
    let spans = [
        DetectedSpan::new("PERSON", 0, 8, 0.8),
        DetectedSpan::new("EMAIL_ADDRESS", 4, 20, 0.99),
    ];
    let resolved = resolve_spans("john.doe@example.com", &spans).unwrap();
    assert_eq!(resolved, vec![DetectedSpan::new("EMAIL_ADDRESS", 4, 20, 0.99)]);
}

#[test]
fn test_irreversible_operators_are_never_recovered() {
    let text = "Jane Roe mailed jane@roe.io from 555-9876";
    let spans = [
        DetectedSpan::new("PERSON", 0, 8, 0.85),
        DetectedSpan::new("EMAIL_ADDRESS", 16, 27, 0.95),
        DetectedSpan::new("PHONE_NUMBER", 33, 41, 0.9),
    ];
    let anonymized = AnonymizerEngine::new(mixed_registry()).anonymize(text, &spans).unwrap();
    assert_eq!(anonymized.text, " mailed [HIDDEN_EMAIL] from 555-XXXX");

    let deanonymizer = DeanonymizerEngine::new(decrypt_everything());
    let scanned = deanonymizer.deanonymize(&anonymized.text).unwrap();
    assert_eq!(scanned.text, anonymized.text);
    assert!(scanned.nothing_to_recover());

    let exact = deanonymizer
        .deanonymize_with_records(&anonymized.text, &anonymized.records)
        .unwrap();
    assert!(exact.nothing_to_recover());
}

#[test]
fn test_anonymize_error_surfaces_entity_type() {
    let registry =
        OperatorRegistry::from_operators([("CREDIT_CARD", Operator::decrypt(key()))]).unwrap();
    let err = AnonymizerEngine::new(registry)
        .anonymize("card 4111111111111111", &[DetectedSpan::new("CREDIT_CARD", 5, 21, 0.95)])
        .unwrap_err();

    assert!(err.to_string().contains("CREDIT_CARD"));
    assert!(matches!(err, EngineError::OperatorFailure { .. }));
}

proptest! {
    #[test]
    fn resolved_spans_never_overlap(
        text in "[a-zA-Zé ,.]{1,120}",
        raw in raw_spans()
    ) {
        let spans = spans_over(&text, &raw);
        let resolved = resolve_spans(&text, &spans).unwrap();

        for pair in resolved.windows(2) {
            prop_assert!(pair[0].end <= pair[1].start, "overlap: {:?}", pair);
        }
        for span in &resolved {
            prop_assert!(spans.contains(span));
        }
    }

    #[test]
    fn dropped_spans_always_conflict_with_a_kept_span(
        text in "[a-zA-Zé ,.]{1,120}",
        raw in raw_spans()
    ) {
        let spans = spans_over(&text, &raw);
        let resolved = resolve_spans(&text, &spans).unwrap();

        for span in spans.iter().filter(|s| !resolved.contains(s)) {
            prop_assert!(
                resolved.iter().any(|kept| kept.overlaps(span)),
                "{:?} dropped without conflict, kept {:?}", span, resolved
            );
        }
    }

    #[test]
    fn records_describe_the_new_text_exactly(
        text in "[a-zA-Zé ,.@0-9]{1,120}",
        raw in raw_spans()
    ) {
        let registry = mixed_registry();
        let engine = AnonymizerEngine::new(registry.clone());
        let result = engine.anonymize(&text, &spans_over(&text, &raw)).unwrap();

        let mut rebuilt = String::new();
        let mut cursor = 0;
        for record in &result.records {
            let original = &text[record.original_start..record.original_end];
            let replacement = &result.text[record.new_start..record.new_end];
            let expected = registry
                .resolve(&record.entity_type)
                .unwrap()
                .apply(&record.entity_type, original)
                .unwrap();
            prop_assert_eq!(replacement, expected.as_str());

            rebuilt.push_str(&text[cursor..record.original_start]);
            rebuilt.push_str(replacement);
            cursor = record.original_end;
        }
        rebuilt.push_str(&text[cursor..]);
        prop_assert_eq!(rebuilt, result.text);
    }

    #[test]
    fn anonymization_is_deterministic(
        text in "[a-zA-Zé ,.@0-9]{1,120}",
        raw in raw_spans()
    ) {
        let spans = spans_over(&text, &raw);
        let engine = AnonymizerEngine::new(mixed_registry());
        prop_assert_eq!(engine.anonymize(&text, &spans).unwrap(), engine.anonymize(&text, &spans).unwrap());
    }

    #[test]
    fn records_round_trip_restores_text(
        text in "[a-zA-Zé ,.@0-9]{1,120}",
        raw in raw_spans()
    ) {
        let spans = spans_over(&text, &raw);
        let anonymized = AnonymizerEngine::new(encrypt_everything()).anonymize(&text, &spans).unwrap();

        let restored = DeanonymizerEngine::new(decrypt_everything())
            .deanonymize_with_records(&anonymized.text, &anonymized.records)
            .unwrap();
        prop_assert_eq!(&restored.text, &text);
        prop_assert!(restored.is_complete());
        prop_assert_eq!(restored.recovered.len(), anonymized.records.len());
    }

    #[test]
    fn scan_round_trip_restores_delimited_tokens(
        words in prop::collection::vec("[a-z]{1,10}", 1..8),
        cards in prop::collection::vec("[0-9]{13,19}", 1..4)
    ) {
        let mut text = String::new();
        let mut spans = Vec::new();
        for (i, word) in words.iter().enumerate() {
            text.push_str(word);
            text.push(' ');
            if let Some(card) = cards.get(i) {
                spans.push(DetectedSpan::new("CREDIT_CARD", text.len(), text.len() + card.len(), 0.95));
                text.push_str(card);
                text.push(' ');
            }
        }

        let anonymized = AnonymizerEngine::new(mixed_registry()).anonymize(&text, &spans).unwrap();
        let restored = DeanonymizerEngine::new(
            OperatorRegistry::from_operators([("CREDIT_CARD", Operator::decrypt(key()))]).unwrap(),
        )
        .deanonymize(&anonymized.text)
        .unwrap();

        prop_assert_eq!(&restored.text, &text);
        prop_assert_eq!(restored.recovered.len(), spans.len());
    }

    #[test]
    fn scan_round_trip_restores_tokens_after_any_prefix(
        prefixes in prop::collection::vec("[A-Za-z0-9_: -]{0,6}", 1..4),
        cards in prop::collection::vec("[0-9]{13,19}", 1..4)
    ) {
        let mut text = String::new();
        let mut spans = Vec::new();
        for (prefix, card) in prefixes.iter().zip(&cards) {
            text.push_str(prefix);
            spans.push(DetectedSpan::new("CREDIT_CARD", text.len(), text.len() + card.len(), 0.95));
            text.push_str(card);
            text.push(';');
        }

        let anonymized = AnonymizerEngine::new(mixed_registry()).anonymize(&text, &spans).unwrap();
        let restored = DeanonymizerEngine::new(
            OperatorRegistry::from_operators([("CREDIT_CARD", Operator::decrypt(key()))]).unwrap(),
        )
        .deanonymize(&anonymized.text)
        .unwrap();

        prop_assert_eq!(&restored.text, &text);
        prop_assert!(restored.is_complete());
        prop_assert_eq!(restored.recovered.len(), spans.len());
    }
}
