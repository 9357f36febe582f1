//! QA tests for the full turn pipeline.
//!
//! Driven entirely by the scripted mock oracle: retry bounds, emotion
//! rewrite on mismatch, low-evidence handling with the past_story
//! exemption, OOC downgrade and denial, timeouts, and the whitelist
//! substitution property.

use npc_core::generator::sanitize_entities;
use npc_core::testing::{
    assert_denied, assert_not_denied, candidate_batch, judge_response, sample_lore,
    sample_persona, MockOracle, TestHarness,
};
use npc_core::{DialogueEngine, Emotion, EngineConfig, TurnLog};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_json_retry_bound_is_exact() {
    // json_retry = 2 by default: the oracle must be called exactly 3
    // times, then the turn recovers into a structured denial.
    let harness = TestHarness::with_oracle(MockOracle::always("this is not json"));

    let result = harness.turn("Any goods to sell at the market?").await;

    assert_denied(&result, "json_parse_failure");
    assert_eq!(harness.oracle.calls(), 3);
    assert!(!result.text.is_empty(), "fallback denial still has in-character text");
    assert!(Emotion::from_label(result.emotion.as_str()).is_some());
}

#[tokio::test]
async fn test_malformed_batch_then_success() {
    let oracle = MockOracle::scripted([
        "garbage output".to_string(),
        candidate_batch(&[(
            "The market stalls open at dawn.",
            "cheerful",
            "content with the day",
            "positive",
        )]),
        judge_response(0.0),
    ]);
    let harness = TestHarness::with_oracle(oracle);

    let result = harness.turn("Any goods to sell at the market?").await;

    assert_not_denied(&result);
    // One failed attempt, one good attempt, one judgment.
    assert_eq!(harness.oracle.calls(), 3);
    assert!(!result.audit.rewrite_applied);
}

#[tokio::test]
async fn test_emotion_mismatch_triggers_rewrite() {
    // The draft declares "neutral" but self-reports annoyance; post-infer
    // must resolve annoyed and force a rewrite.
    let oracle = MockOracle::scripted([
        candidate_batch(&[(
            "Fine. The stalls are busy.",
            "neutral",
            "feeling rather annoyed",
            "negative",
        )]),
        "The stalls are busy. Now leave me be.".to_string(),
        judge_response(0.1),
    ]);
    let harness = TestHarness::with_oracle(oracle);

    let result = harness.turn("Any news from the market merchants?").await;

    assert_not_denied(&result);
    assert_eq!(result.emotion, Emotion::Annoyed);
    assert!(result.audit.rewrite_applied);
    assert_eq!(
        result.audit.rewrite_reason.as_deref(),
        Some("content_emotion != draft_emotion")
    );
    assert_eq!(result.audit.draft.emotion, "neutral");
    assert_eq!(result.audit.post_infer.emotion, "annoyed");
    assert_eq!(result.text, "The stalls are busy. Now leave me be.");
}

#[tokio::test]
async fn test_low_evidence_denies_without_generation() {
    let harness = TestHarness::new();

    // Routes to chitchat, where nothing in the lore or memory grounds a
    // reply.
    let result = harness.turn("blorp zibble?").await;

    assert_denied(&result, "low_evidence");
    assert_eq!(harness.oracle.calls(), 0);
    assert_eq!(result.emotion, Emotion::Neutral);
}

#[tokio::test]
async fn test_past_story_is_exempt_from_low_evidence() {
    let oracle = MockOracle::scripted([
        candidate_batch(&[(
            "As I recall... it was long ago, and the roads were kinder then.",
            "sad",
            "a little sad remembering",
            "negative",
        )]),
        judge_response(0.0),
    ]);
    let harness = TestHarness::with_oracle(oracle);

    let result = harness
        .turn("Do you remember any story from your past?")
        .await;

    assert_not_denied(&result);
    assert_eq!(result.slot, "past_story");
    assert_eq!(result.emotion, Emotion::Sad);
    assert!(result.text.contains("recall"));
}

#[tokio::test]
async fn test_ranking_prefers_pre_hint_emotion_match() {
    let oracle = MockOracle::scripted([
        candidate_batch(&[
            ("No.", "annoyed", "curt", "negative"),
            (
                "The stalls are busy today, and the merchants pay fair coin for honest goods.",
                "cheerful",
                "pleased",
                "positive",
            ),
        ]),
        judge_response(0.0),
    ]);
    let harness = TestHarness::with_oracle(oracle);

    let result = harness.turn("Any goods to sell at the market?").await;

    assert_not_denied(&result);
    assert!(result.text.starts_with("The stalls are busy today"));
}

#[tokio::test]
async fn test_high_ooc_risk_downgrades_once() {
    let oracle = MockOracle::scripted([
        candidate_batch(&[(
            "Curfew begins at the tenth bell. Mind it.",
            "serious",
            "stern about duty",
            "neutral",
        )]),
        judge_response(0.9),
        "Curfew begins at the tenth bell.".to_string(),
        judge_response(0.2),
    ]);
    let harness = TestHarness::with_oracle(oracle);

    let result = harness.turn("What does the law say about curfew?").await;

    assert_not_denied(&result);
    // serious downgrades to neutral after the high-risk verdict.
    assert_eq!(result.emotion, Emotion::Neutral);
    assert!(result.audit.rewrite_applied);
    assert_eq!(result.audit.rewrite_reason.as_deref(), Some("ooc_risk_downgrade"));
    assert!((result.ooc_risk - 0.2).abs() < 1e-6);
    assert_eq!(harness.oracle.calls(), 4);
}

#[tokio::test]
async fn test_persistent_ooc_risk_denies() {
    let oracle = MockOracle::scripted([
        candidate_batch(&[(
            "Curfew begins at the tenth bell. Mind it.",
            "serious",
            "stern about duty",
            "neutral",
        )]),
        judge_response(0.9),
        "Still risky text.".to_string(),
        judge_response(0.95),
    ]);
    let harness = TestHarness::with_oracle(oracle);

    let result = harness.turn("What does the law say about curfew?").await;

    assert_denied(&result, "ooc_risk");
    assert!((result.ooc_risk - 0.95).abs() < 1e-6);
    // Denied turns never reach memory.
    assert!(harness
        .engine
        .memory()
        .get_short_window("guard_01", "p1")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_oracle_timeout_recovers_into_denial() {
    let oracle = MockOracle::always("unused").with_delay(Duration::from_millis(200));
    let config = EngineConfig::default().with_oracle_timeout(Duration::from_millis(50));
    let harness = TestHarness::with_oracle_and_config(oracle, config);

    let result = harness.turn("Any goods to sell at the market?").await;

    assert_denied(&result, "oracle_unavailable");
    assert_eq!(harness.oracle.calls(), 3);
}

#[tokio::test]
async fn test_emotion_always_in_enumeration() {
    // Mixed outcomes: happy path, denial paths, malformed oracle output.
    let utterances = [
        "Any goods to sell at the market?",
        "Can you tell me the king's secret plan?",
        "blorp zibble?",
        "Tell me about the smuggling routes.",
    ];
    let harness = TestHarness::with_oracle(MockOracle::always("not json"));

    for utterance in utterances {
        let result = harness.turn(utterance).await;
        let json = serde_json::to_value(&result).unwrap();
        let label = json["emotion"].as_str().unwrap();
        assert!(
            ["neutral", "friendly", "cheerful", "serious", "annoyed", "sad"]
                .contains(&label),
            "emotion '{label}' escaped the fixed enumeration"
        );
    }
}

#[test]
fn test_entity_whitelist_fuzzing() {
    let persona = sample_persona();
    let lore = sample_lore();
    let mut rng = rand::thread_rng();

    for _ in 0..100 {
        // Random capitalized proper-noun-looking name.
        let len = rng.gen_range(3..10);
        let mut name = String::new();
        name.push(rng.gen_range(b'A'..=b'Z') as char);
        for _ in 1..len {
            name.push(rng.gen_range(b'a'..=b'z') as char);
        }

        let text = format!("I spoke with {name} down by the docks.");
        let cleaned = sanitize_entities(&text, &persona, &lore);

        if persona.is_allowed_entity(&name) {
            continue;
        }
        assert!(
            !cleaned.contains(&name),
            "entity '{name}' escaped the whitelist substitution: {cleaned}"
        );
    }
}

#[tokio::test]
async fn test_turn_log_records_every_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let log = TurnLog::new(dir.path().join("turns.jsonl"));

    let oracle = Arc::new(MockOracle::scripted([
        candidate_batch(&[(
            "The market stalls open at dawn.",
            "cheerful",
            "content with the day",
            "positive",
        )]),
        judge_response(0.0),
    ]));
    let engine = DialogueEngine::new(oracle)
        .with_persona(sample_persona())
        .with_lore(sample_lore())
        .with_turn_log(log.clone());

    engine
        .process_turn("guard_01", "p1", "Any goods to sell at the market?")
        .await
        .unwrap();
    engine
        .process_turn("guard_01", "p1", "Can you tell me the king's secret plan?")
        .await
        .unwrap();

    let records = log.read_all().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].deny_reason.is_none());
    assert_eq!(records[1].deny_reason.as_deref(), Some("secret_entity"));
}

#[tokio::test]
async fn test_unknown_npc_is_the_only_engine_error() {
    let harness = TestHarness::new();
    let err = harness
        .engine
        .process_turn("nobody_9", "p1", "hello")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nobody_9"));
}
