//! Two-pass emotion resolution via weighted voting.
//!
//! Every vote source implements [`EmotionSignal`]; the engine sums
//! `weight * score` over a configurable list of (source, weight) pairs, so
//! signals can be added or removed without touching the aggregation. The
//! pre-generation pass runs without the model vote (no draft exists yet);
//! the post-generation pass is authoritative for the final emotion.

use crate::persona::Persona;
use crate::slots::SlotConfig;
use crate::text::token_set;
use crate::turn::DraftSignals;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The fixed emotion vocabulary every turn result must draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Neutral,
    Friendly,
    Cheerful,
    Serious,
    Annoyed,
    Sad,
}

/// All emotions, in declaration order.
pub const ALL_EMOTIONS: [Emotion; 6] = [
    Emotion::Neutral,
    Emotion::Friendly,
    Emotion::Cheerful,
    Emotion::Serious,
    Emotion::Annoyed,
    Emotion::Sad,
];

/// Tie-break order on equal scores: first entry wins, neutral last.
pub const PRIORITY: [Emotion; 6] = [
    Emotion::Friendly,
    Emotion::Cheerful,
    Emotion::Serious,
    Emotion::Annoyed,
    Emotion::Sad,
    Emotion::Neutral,
];

impl Emotion {
    /// The wire label for this emotion.
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Friendly => "friendly",
            Emotion::Cheerful => "cheerful",
            Emotion::Serious => "serious",
            Emotion::Annoyed => "annoyed",
            Emotion::Sad => "sad",
        }
    }

    /// Parse a model-reported label, tolerating common synonyms.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "neutral" | "calm" => Some(Emotion::Neutral),
            "friendly" | "warm" | "kind" => Some(Emotion::Friendly),
            "cheerful" | "happy" | "joyful" => Some(Emotion::Cheerful),
            "serious" | "stern" | "grave" | "cautious" => Some(Emotion::Serious),
            "annoyed" | "angry" | "irritated" => Some(Emotion::Annoyed),
            "sad" | "gloomy" | "unhappy" => Some(Emotion::Sad),
            _ => None,
        }
    }

    /// The safer emotion to fall back to when OOC risk stays high.
    pub fn downgrade(self) -> Self {
        match self {
            Emotion::Cheerful => Emotion::Friendly,
            _ => Emotion::Neutral,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a vote source may look at.
pub struct EmotionContext<'a> {
    /// The raw player utterance.
    pub utterance: &'a str,
    /// Normalized utterance tokens.
    pub tokens: HashSet<String>,
    /// The NPC persona.
    pub persona: &'a Persona,
    /// The routed slot.
    pub slot: &'a SlotConfig,
    /// Emotion recorded on the most recent short-term memory event.
    pub last_emotion: Option<Emotion>,
    /// Draft signals, present only in the post-generation pass.
    pub draft: Option<&'a DraftSignals>,
}

impl<'a> EmotionContext<'a> {
    /// Build a pre-generation context (no draft).
    pub fn new(
        utterance: &'a str,
        persona: &'a Persona,
        slot: &'a SlotConfig,
        last_emotion: Option<Emotion>,
    ) -> Self {
        Self {
            utterance,
            tokens: token_set(utterance),
            persona,
            slot,
            last_emotion,
            draft: None,
        }
    }

    /// Attach draft signals for the post-generation pass.
    pub fn with_draft(mut self, draft: &'a DraftSignals) -> Self {
        self.draft = Some(draft);
        self
    }
}

/// A single vote source.
pub trait EmotionSignal: Send + Sync {
    /// Name of this signal, for logging.
    fn name(&self) -> &str;

    /// Score for a candidate emotion, typically 0/1 or a small positive.
    fn score(&self, emotion: Emotion, ctx: &EmotionContext<'_>) -> f32;
}

/// Weights for the standard vote sources.
#[derive(Debug, Clone, Copy)]
pub struct EmotionWeights {
    pub baseline: f32,
    pub slot: f32,
    pub trigger: f32,
    pub last_turn: f32,
    pub model: f32,
}

impl Default for EmotionWeights {
    fn default() -> Self {
        Self {
            baseline: 0.6,
            slot: 0.8,
            trigger: 1.0,
            last_turn: 0.6,
            model: 1.2,
        }
    }
}

/// Votes for the persona's baseline emotion.
pub struct BaselineVote;

impl EmotionSignal for BaselineVote {
    fn name(&self) -> &str {
        "baseline"
    }

    fn score(&self, emotion: Emotion, ctx: &EmotionContext<'_>) -> f32 {
        if ctx.persona.baseline_emotion == emotion {
            1.0
        } else {
            0.0
        }
    }
}

/// Votes for the active slot's configured tone.
pub struct SlotToneVote;

impl EmotionSignal for SlotToneVote {
    fn name(&self) -> &str {
        "slot_tone"
    }

    fn score(&self, emotion: Emotion, ctx: &EmotionContext<'_>) -> f32 {
        let tone = ctx
            .persona
            .tone_for(&ctx.slot.id)
            .or(ctx.slot.tone);
        if tone == Some(emotion) {
            1.0
        } else {
            0.0
        }
    }
}

/// Keyword triggers in the utterance, with per-keyword weights.
const TRIGGERS: &[(&str, Emotion, f32)] = &[
    ("please", Emotion::Friendly, 1.0),
    ("thank", Emotion::Friendly, 1.0),
    ("help", Emotion::Friendly, 1.0),
    ("hurry", Emotion::Serious, 1.0),
    ("urgent", Emotion::Serious, 1.0),
    ("danger", Emotion::Serious, 1.0),
    ("bribe", Emotion::Annoyed, 1.0),
    ("insult", Emotion::Annoyed, 2.0),
    ("festival", Emotion::Cheerful, 1.0),
    ("mourn", Emotion::Sad, 1.0),
];

/// Votes from keyword triggers found in the utterance.
pub struct TriggerVote;

impl EmotionSignal for TriggerVote {
    fn name(&self) -> &str {
        "trigger"
    }

    fn score(&self, emotion: Emotion, ctx: &EmotionContext<'_>) -> f32 {
        TRIGGERS
            .iter()
            .filter(|(keyword, e, _)| *e == emotion && ctx.tokens.contains(crate::text::stem(keyword)))
            .map(|(_, _, w)| w)
            .sum()
    }
}

/// Votes for the emotion of the most recent remembered turn.
pub struct LastEmotionVote;

impl EmotionSignal for LastEmotionVote {
    fn name(&self) -> &str {
        "last_turn"
    }

    fn score(&self, emotion: Emotion, ctx: &EmotionContext<'_>) -> f32 {
        if ctx.last_emotion == Some(emotion) {
            1.0
        } else {
            0.0
        }
    }
}

/// Votes from the draft's self-reported feeling and sentiment.
///
/// Scores zero in the pre-generation pass, where no draft exists.
pub struct ApiVote;

impl EmotionSignal for ApiVote {
    fn name(&self) -> &str {
        "api"
    }

    fn score(&self, emotion: Emotion, ctx: &EmotionContext<'_>) -> f32 {
        let Some(draft) = ctx.draft else {
            return 0.0;
        };

        let mut score = 0.0;

        // The self-report phrase may name the emotion outright.
        let report = format!(
            "{} {}",
            draft.self_report.to_lowercase(),
            draft.sentiment.to_lowercase()
        );
        for word in report.split(|c: char| !c.is_alphabetic()) {
            if Emotion::from_label(word) == Some(emotion) {
                score += 1.0;
            }
        }

        // Coarse sentiment polarity.
        let polarity = match draft.sentiment.trim().to_lowercase().as_str() {
            "positive" => Some(Emotion::Friendly),
            "negative" => Some(Emotion::Annoyed),
            "neutral" => Some(Emotion::Neutral),
            _ => None,
        };
        if polarity == Some(emotion) {
            score += 0.5;
        }

        score
    }
}

/// The weighted-voting emotion engine.
pub struct EmotionEngine {
    sources: Vec<(Box<dyn EmotionSignal>, f32)>,
}

impl EmotionEngine {
    /// Build the standard five-source engine.
    pub fn standard(weights: EmotionWeights) -> Self {
        Self {
            sources: vec![
                (Box::new(BaselineVote) as Box<dyn EmotionSignal>, weights.baseline),
                (Box::new(SlotToneVote), weights.slot),
                (Box::new(TriggerVote), weights.trigger),
                (Box::new(LastEmotionVote), weights.last_turn),
                (Box::new(ApiVote), weights.model),
            ],
        }
    }

    /// Add a custom vote source.
    pub fn with_source(mut self, source: Box<dyn EmotionSignal>, weight: f32) -> Self {
        self.sources.push((source, weight));
        self
    }

    /// Pre-generation hint. The model vote contributes nothing here
    /// because `ctx.draft` is unset.
    pub fn pre_hint(&self, ctx: &EmotionContext<'_>) -> Emotion {
        self.resolve(ctx).0
    }

    /// Post-generation inference with confidence. Authoritative for the
    /// final emotion.
    pub fn post_infer(&self, ctx: &EmotionContext<'_>) -> (Emotion, f32) {
        self.resolve(ctx)
    }

    fn resolve(&self, ctx: &EmotionContext<'_>) -> (Emotion, f32) {
        let mut scores = [0.0f32; ALL_EMOTIONS.len()];
        for (i, emotion) in ALL_EMOTIONS.iter().enumerate() {
            for (source, weight) in &self.sources {
                scores[i] += weight * source.score(*emotion, ctx);
            }
        }

        let total: f32 = scores.iter().filter(|s| **s > 0.0).sum();
        if total <= 0.0 {
            return (ctx.persona.baseline_emotion, 0.0);
        }

        // Highest score wins; on equal scores the PRIORITY order decides.
        let mut best = PRIORITY[0];
        let mut best_score = f32::MIN;
        for emotion in PRIORITY {
            let score = scores[emotion as usize];
            if score > best_score {
                best = emotion;
                best_score = score;
            }
        }

        (best, best_score / total)
    }
}
