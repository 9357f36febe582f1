//! Evidence retrieval for grounding replies.
//!
//! Scores public lore facts and long-term memory items against the
//! utterance with a weighted sum of token overlap, shared-entity bonus,
//! slot topic coverage, and prior-memory relevance. Facts violating the
//! active slot's topic constraints are excluded outright before scoring.

use crate::memory::{LongTermFact, MemoryEvent};
use crate::persona::{LoreBook, Persona};
use crate::slots::SlotConfig;
use crate::text::{overlap, phrase_matches, token_set};
use serde::{Deserialize, Serialize};

/// Where a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Lore,
    Memory,
}

/// A scored grounding item handed to the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Reference id for `mem_refs`, e.g. `lore:l3` or `event:2026-08-06#5`.
    pub ref_id: String,
    pub text: String,
    pub score: f32,
    pub source: EvidenceSource,
    /// Recency rank for tie-breaks; newer memory items rank lower.
    recency_rank: usize,
}

/// Scoring weights and the top-k cutoff.
#[derive(Debug, Clone, Copy)]
pub struct RetrieverConfig {
    pub top_k: usize,
    pub overlap_weight: f32,
    pub entity_bonus: f32,
    pub topic_bonus: f32,
    pub memory_bonus: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            overlap_weight: 1.0,
            entity_bonus: 0.5,
            topic_bonus: 0.5,
            memory_bonus: 0.5,
        }
    }
}

impl RetrieverConfig {
    /// Set the top-k cutoff.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// Scores and selects evidence for a turn.
#[derive(Debug, Clone, Default)]
pub struct EvidenceRetriever {
    config: RetrieverConfig,
}

impl EvidenceRetriever {
    /// Create a retriever with the given config.
    pub fn new(config: RetrieverConfig) -> Self {
        Self { config }
    }

    /// Retrieve the top-k evidence items for this utterance and slot.
    ///
    /// Ties break toward memory over lore, then toward more recent memory,
    /// then lore declaration order. An empty result with any slot other
    /// than past_story is the engine's low-evidence denial signal.
    pub fn retrieve(
        &self,
        utterance: &str,
        slot: &SlotConfig,
        persona: &Persona,
        lore: &LoreBook,
        short_window: &[MemoryEvent],
        longterm: &[LongTermFact],
    ) -> Vec<Evidence> {
        let query = token_set(utterance);
        let window_text: String = short_window
            .iter()
            .map(|e| format!("{} {}", e.utterance, e.reply_summary))
            .collect::<Vec<_>>()
            .join(" ");
        let window_tokens = token_set(&window_text);

        let mut scored: Vec<Evidence> = Vec::new();

        for (order, fact) in lore.public_facts().enumerate() {
            // Hard filters, not penalties.
            if !slot.required_topics.is_empty()
                && !slot.required_topics.iter().any(|t| fact.has_tag(t))
            {
                continue;
            }
            if slot.forbidden_topics.iter().any(|t| fact.has_tag(t)) {
                continue;
            }
            if !persona.allowed_tags.is_empty()
                && !fact.tags.is_empty()
                && !persona.allowed_tags.iter().any(|t| fact.has_tag(t))
            {
                continue;
            }

            let token_overlap = overlap(&query, &fact.text) as f32;
            let shared_entity = fact
                .entities
                .iter()
                .any(|e| phrase_matches(&query, e)) as u32 as f32;
            let topic_coverage = if slot.required_topics.is_empty() {
                0.0
            } else {
                slot.required_topics
                    .iter()
                    .filter(|t| fact.has_tag(t))
                    .count() as f32
                    / slot.required_topics.len() as f32
            };
            let memory_relevance = overlap(&window_tokens, &fact.text) as f32;

            let score = self.config.overlap_weight * token_overlap
                + self.config.entity_bonus * shared_entity
                + self.config.topic_bonus * topic_coverage
                + self.config.memory_bonus * memory_relevance.min(1.0);

            if score > 0.0 {
                scored.push(Evidence {
                    ref_id: fact.ref_id(),
                    text: fact.text.clone(),
                    score,
                    source: EvidenceSource::Lore,
                    recency_rank: usize::MAX - order,
                });
            }
        }

        // Long-term memory items were already relevance-filtered by recall
        // and gated at write time, so no per-fact policy check here.
        for (rank, fact) in longterm.iter().enumerate() {
            let token_overlap = overlap(&query, &fact.fact) as f32;
            let score = self.config.overlap_weight * token_overlap + self.config.memory_bonus;
            if score > 0.0 {
                scored.push(Evidence {
                    ref_id: fact.ref_id(),
                    text: fact.fact.clone(),
                    score,
                    source: EvidenceSource::Memory,
                    recency_rank: rank,
                });
            }
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| source_rank(a.source).cmp(&source_rank(b.source)))
                .then_with(|| a.recency_rank.cmp(&b.recency_rank))
        });
        scored.truncate(self.config.top_k);
        scored
    }
}

fn source_rank(source: EvidenceSource) -> u8 {
    match source {
        EvidenceSource::Memory => 0,
        EvidenceSource::Lore => 1,
    }
}
