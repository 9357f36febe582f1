//! Testing utilities for the dialogue pipeline.
//!
//! This module provides tools for integration testing:
//! - `MockOracle` for deterministic testing without API calls
//! - `TestHarness` with a ready-made gate-guard persona and lore set
//! - Assertion helpers for verifying turn results

use crate::engine::{DialogueEngine, EngineConfig};
use crate::emotion::Emotion;
use crate::persona::{LoreBook, LoreFact, Persona};
use crate::turn::TurnResult;
use async_trait::async_trait;
use oracle::{Completion, CompletionRequest, Oracle, OracleError};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A mock oracle that returns scripted responses.
///
/// Responses are consumed in order; when the script runs out, the default
/// response is returned if one is set, otherwise the call fails like an
/// unavailable provider. Every call is counted and its prompt recorded.
pub struct MockOracle {
    responses: Mutex<VecDeque<String>>,
    default_response: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockOracle {
    /// Create a mock with scripted responses, consumed in order.
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            default_response: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Create a mock that returns the same response for every call.
    pub fn always(response: impl Into<String>) -> Self {
        Self::scripted(Vec::<String>::new()).with_default(response)
    }

    /// Create a mock where every call fails, like an unreachable
    /// provider.
    pub fn silent() -> Self {
        Self::scripted(Vec::<String>::new())
    }

    /// Set the response returned after the script is exhausted.
    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default_response = Some(response.into());
        self
    }

    /// Delay every call, for timeout testing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next.or_else(|| self.default_response.clone()) {
            Some(text) => Ok(Completion::text(text)),
            None => Err(OracleError::Api {
                status: 503,
                message: "mock oracle has no more scripted responses".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Build a candidate-batch response the generator can parse.
///
/// Each entry is (reply, emotion, self_report, sentiment).
pub fn candidate_batch(entries: &[(&str, &str, &str, &str)]) -> String {
    let items: Vec<_> = entries
        .iter()
        .map(|(reply, emotion, self_report, sentiment)| {
            json!({
                "reply": reply,
                "emotion": emotion,
                "self_report": self_report,
                "sentiment": sentiment,
            })
        })
        .collect();
    serde_json::to_string(&items).expect("json building cannot fail")
}

/// Build an OOC judge response.
pub fn judge_response(risk: f32) -> String {
    json!({"ooc_risk": risk, "reasons": []}).to_string()
}

/// Build a summarizer response. Each entry is (fact, emotion).
pub fn summary_response(entries: &[(&str, &str)]) -> String {
    let items: Vec<_> = entries
        .iter()
        .map(|(fact, emotion)| json!({"fact": fact, "emotion": emotion}))
        .collect();
    serde_json::to_string(&items).expect("json building cannot fail")
}

/// The sample persona used by the harness: Bram, a gate guard.
pub fn sample_persona() -> Persona {
    Persona::new("guard_01", "Bram")
        .with_role("gate guard of Havenrest")
        .with_speaking_style("formal, brief")
        .with_baseline_emotion(Emotion::Neutral)
        .with_taboo_topics(vec!["smuggling routes".to_string()])
        .with_secret_entities(vec!["king's plan".to_string()])
        .with_allowed_entities(vec![
            "Elira".to_string(),
            "EastGate".to_string(),
            "TownInn".to_string(),
        ])
        .with_tone("greeting", Emotion::Friendly)
        .with_tone("law_info", Emotion::Serious)
}

/// The sample lore set used by the harness.
pub fn sample_lore() -> LoreBook {
    LoreBook::from_facts(vec![
        LoreFact::new("l1", "The market opens at dawn beside the east gate.")
            .with_tags(vec!["trade".to_string(), "city".to_string(), "items".to_string()])
            .with_entities(vec!["EastGate".to_string()]),
        LoreFact::new("l2", "Elira runs the town inn and pays fair coin for goods.")
            .with_tags(vec!["trade".to_string(), "items".to_string()])
            .with_entities(vec!["Elira".to_string(), "TownInn".to_string()]),
        LoreFact::new("l3", "Curfew begins at the tenth bell.")
            .with_tags(vec!["law".to_string()]),
        LoreFact::new("l4", "The harvest festival fills the square with lanterns.")
            .with_tags(vec!["city".to_string(), "events".to_string()]),
        LoreFact::new("l5", "The king's plan moves the garrison south.")
            .secret()
            .with_tags(vec!["secret".to_string()])
            .with_entities(vec!["King".to_string()]),
    ])
}

/// Test harness wiring a mock oracle into a ready-to-use engine.
pub struct TestHarness {
    /// The mock oracle, for call-count and prompt assertions.
    pub oracle: Arc<MockOracle>,
    /// The engine under test.
    pub engine: DialogueEngine,
}

impl TestHarness {
    /// Create a harness whose oracle fails every call.
    pub fn new() -> Self {
        Self::with_oracle(MockOracle::silent())
    }

    /// Create a harness around a specific mock oracle.
    pub fn with_oracle(oracle: MockOracle) -> Self {
        Self::with_oracle_and_config(oracle, EngineConfig::default())
    }

    /// Create a harness with explicit engine configuration.
    pub fn with_oracle_and_config(oracle: MockOracle, config: EngineConfig) -> Self {
        let oracle = Arc::new(oracle);
        let engine = DialogueEngine::with_config(oracle.clone(), config)
            .with_persona(sample_persona())
            .with_lore(sample_lore());
        Self { oracle, engine }
    }

    /// Run one turn as the default player against the sample guard.
    pub async fn turn(&self, utterance: &str) -> TurnResult {
        self.engine
            .process_turn("guard_01", "p1", utterance)
            .await
            .expect("sample NPC is registered")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert a turn was denied for the given reason.
#[track_caller]
pub fn assert_denied(result: &TurnResult, reason: &str) {
    assert_eq!(
        result.audit.deny_reason.as_deref(),
        Some(reason),
        "expected denial with reason '{reason}', got {:?}",
        result.audit.deny_reason
    );
}

/// Assert a turn completed without any denial.
#[track_caller]
pub fn assert_not_denied(result: &TurnResult) {
    assert!(
        result.audit.deny_reason.is_none(),
        "expected no denial, got {:?}",
        result.audit.deny_reason
    );
}
