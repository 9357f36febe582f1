//! Lexical slot routing.
//!
//! Scores the utterance against each slot's reference vocabulary with
//! cosine similarity over token-frequency vectors, subject to hard
//! must/forbid keyword rules. Deterministic and side-effect-free.

use crate::slots::{SlotConfig, SlotRegistry};
use crate::text::{cosine, phrase_matches, term_freq, token_set, tokenize};
use tracing::debug;

/// Default confidence floor below which routing falls back to chitchat.
const DEFAULT_MIN_CONFIDENCE: f32 = 0.15;

/// The routing decision, with the winning score for the audit trail.
#[derive(Debug, Clone)]
pub struct RouteDecision<'a> {
    /// The selected slot.
    pub slot: &'a SlotConfig,
    /// Cosine score of the winning slot (0.0 on fallback).
    pub score: f32,
}

/// Routes utterances to conversational slots.
#[derive(Debug, Clone)]
pub struct SlotRouter {
    registry: SlotRegistry,
    min_confidence: f32,
}

impl SlotRouter {
    /// Create a router over the given registry.
    pub fn new(registry: SlotRegistry) -> Self {
        Self {
            registry,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    /// Set the confidence floor for the fallback.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// The registry this router scores against.
    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    /// Route an utterance to the best-scoring slot.
    ///
    /// A forbidden token present, or a must-have token absent, zeroes a
    /// slot's score before selection. Ties break by slot priority (lower
    /// wins); an all-zero or low-confidence result falls back to chitchat.
    pub fn route(&self, utterance: &str) -> RouteDecision<'_> {
        let tokens = token_set(utterance);
        let query = term_freq(&tokenize(utterance));

        let mut best: Option<(&SlotConfig, f32)> = None;
        for slot in self.registry.slots() {
            let mut score = self.slot_score(slot, &query);

            if slot.must.iter().any(|m| !phrase_matches(&tokens, m)) {
                score = 0.0;
            }
            if slot.forbid.iter().any(|f| phrase_matches(&tokens, f)) {
                score = 0.0;
            }

            let better = match best {
                None => score > 0.0,
                Some((current, current_score)) => {
                    score > current_score
                        || (score == current_score && slot.priority < current.priority)
                }
            };
            if better {
                best = Some((slot, score));
            }
        }

        match best {
            Some((slot, score)) if score >= self.min_confidence => {
                debug!(slot = %slot.id, score, "routed utterance");
                RouteDecision { slot, score }
            }
            _ => {
                debug!("no slot above confidence floor, falling back");
                RouteDecision {
                    slot: self.registry.fallback(),
                    score: 0.0,
                }
            }
        }
    }

    fn slot_score(
        &self,
        slot: &SlotConfig,
        query: &std::collections::HashMap<String, f32>,
    ) -> f32 {
        if slot.vocabulary.is_empty() {
            return 0.0;
        }
        let vocab_tokens: Vec<String> = slot
            .vocabulary
            .iter()
            .flat_map(|w| tokenize(w))
            .collect();
        let vocab = term_freq(&vocab_tokens);
        cosine(query, &vocab)
    }
}

impl Default for SlotRouter {
    fn default() -> Self {
        Self::new(SlotRegistry::standard())
    }
}
