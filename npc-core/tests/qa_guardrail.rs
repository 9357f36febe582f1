//! QA tests for the pre-generation guardrail path.
//!
//! These verify the safety invariant end to end: a taboo, secret-entity,
//! or unknown-entity match terminates the turn with an in-character
//! refusal before any oracle call is made, and the triggering content
//! never appears in the reply.

use npc_core::testing::{assert_denied, candidate_batch, judge_response, MockOracle, TestHarness};
use npc_core::Emotion;

#[tokio::test]
async fn test_secret_entity_denial_makes_no_generation_call() {
    let harness = TestHarness::new();

    let result = harness.turn("Can you tell me the king's secret plan?").await;

    assert_denied(&result, "secret_entity");
    assert_eq!(result.ooc_risk, 0.0);
    assert_eq!(harness.oracle.calls(), 0, "guardrail denial must not call the oracle");

    // The refusal must not leak the triggering secret.
    let lower = result.text.to_lowercase();
    assert!(!lower.contains("king"));
    assert!(!lower.contains("plan"));
}

#[tokio::test]
async fn test_taboo_topic_denial() {
    let harness = TestHarness::new();

    let result = harness.turn("Tell me about the smuggling routes.").await;

    assert_denied(&result, "taboo");
    assert_eq!(harness.oracle.calls(), 0);
    assert!(!result.text.to_lowercase().contains("smuggling"));
}

#[tokio::test]
async fn test_known_entity_outside_allowlist_denies() {
    let harness = TestHarness::new();

    // "King" exists in the lore universe (via a secret fact) but is not in
    // the persona's allowed entities.
    let result = harness.turn("What is the king doing these days?").await;

    assert_denied(&result, "unknown_entity");
    assert_eq!(harness.oracle.calls(), 0);
}

#[tokio::test]
async fn test_denials_carry_a_valid_emotion() {
    let harness = TestHarness::new();

    for utterance in [
        "Can you tell me the king's secret plan?",
        "Tell me about the smuggling routes.",
    ] {
        let result = harness.turn(utterance).await;
        assert!(
            Emotion::from_label(result.emotion.as_str()).is_some(),
            "denial emotion must stay in the fixed enumeration"
        );
    }
}

#[tokio::test]
async fn test_allowed_entity_passes_guardrail() {
    let oracle = MockOracle::scripted([
        candidate_batch(&[(
            "The market stalls open at dawn.",
            "cheerful",
            "content with the day",
            "positive",
        )]),
        judge_response(0.1),
    ]);
    let harness = TestHarness::with_oracle(oracle);

    let result = harness.turn("Does Elira buy goods at the market?").await;

    assert!(result.audit.deny_reason.is_none());
    assert_eq!(result.slot, "trade");
    assert_eq!(result.emotion, Emotion::Cheerful);
    // One generation call plus one OOC judgment.
    assert_eq!(harness.oracle.calls(), 2);
}
