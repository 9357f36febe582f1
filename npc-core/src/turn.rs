//! Per-turn working state and the turn result wire contract.

use crate::emotion::Emotion;
use crate::memory::MemoryEvent;
use crate::persona::Persona;
use crate::retriever::Evidence;
use crate::slots::SlotConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Working state threaded through the pipeline stages. Created per
/// incoming utterance and discarded once the turn result is emitted.
pub struct TurnContext<'a> {
    pub player_id: &'a str,
    pub npc_id: &'a str,
    pub utterance: &'a str,
    pub persona: &'a Persona,
    pub slot: &'a SlotConfig,
    /// Pre-generation emotion hint biasing the draft prompt.
    pub pre_hint: Emotion,
    /// Evidence selected for grounding, best first.
    pub evidence: Vec<Evidence>,
    /// Short-term window, most recent first.
    pub short_window: Vec<MemoryEvent>,
    pub timestamp: DateTime<Utc>,
}

/// One generated candidate reply, ephemeral within a turn.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub text: String,
    /// The emotion label the draft declared for itself.
    pub emotion: String,
    pub self_report: String,
    pub sentiment: String,
    /// Ranking score, filled in by the orchestrator.
    pub score: f32,
}

/// Signals the draft reported about itself, echoed into the audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftSignals {
    pub emotion: String,
    pub self_report: String,
    pub sentiment: String,
}

impl Candidate {
    /// The draft signals for emotion inference and the audit trail.
    pub fn signals(&self) -> DraftSignals {
        DraftSignals {
            emotion: self.emotion.clone(),
            self_report: self.self_report.clone(),
            sentiment: self.sentiment.clone(),
        }
    }
}

/// Post-generation inference outcome, echoed into the audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostInfer {
    pub emotion: String,
    pub confidence: f32,
}

/// The audit trail attached to every turn result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub pre_hint: String,
    pub draft: DraftSignals,
    pub post_infer: PostInfer,
    pub rewrite_applied: bool,
    pub rewrite_reason: Option<String>,
    pub evidence_ids: Vec<String>,
    pub deny_reason: Option<String>,
}

/// The only externally durable artifact of a turn besides memory writes.
///
/// Field names are the wire contract; serialization must not be renamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub slot: String,
    pub emotion: Emotion,
    pub text: String,
    pub ooc_risk: f32,
    pub mem_refs: Vec<String>,
    pub audit: Audit,
}

impl TurnResult {
    /// Whether this turn ended in a denial of any kind.
    pub fn is_denied(&self) -> bool {
        self.audit.deny_reason.is_some()
    }
}

/// Explicit stage result: either the pipeline continues with a payload or
/// it terminates with a finished turn result. Terminations propagate as
/// values, not exceptions, so every exit point shows up in the control
/// path.
pub enum StageOutcome<T> {
    Continue(T),
    Terminal(TurnResult),
}
