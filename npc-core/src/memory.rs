//! Short- and long-term dialogue memory.
//!
//! Memory is keyed per (npc_id, player_id) pair. Each pair owns a rolling
//! FIFO window of the last five turns plus an append-only list of
//! summarized long-term facts. A pair's state sits behind its own lock so
//! concurrent turns for the same pair serialize, while distinct pairs
//! proceed in parallel.

use crate::emotion::Emotion;
use crate::guardrail;
use crate::persona::{LoreBook, Persona};
use chrono::{DateTime, Utc};
use oracle::{extract_json, CompletionRequest, Oracle};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Size of the short-term window per pair.
pub const SHORT_WINDOW_LEN: usize = 5;

/// Summarization runs on every Nth appended event.
pub const SUMMARIZE_EVERY: u64 = 5;

/// One remembered turn in the short-term window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub npc_id: String,
    pub player_id: String,
    /// Monotonic per-pair turn counter, assigned on append.
    pub turn_index: u64,
    pub utterance: String,
    pub reply_summary: String,
    pub emotion: Emotion,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEvent {
    /// Create an event; the store assigns `turn_index` on append.
    pub fn new(
        npc_id: impl Into<String>,
        player_id: impl Into<String>,
        utterance: impl Into<String>,
        reply_summary: impl Into<String>,
        emotion: Emotion,
    ) -> Self {
        Self {
            npc_id: npc_id.into(),
            player_id: player_id.into(),
            turn_index: 0,
            utterance: utterance.into(),
            reply_summary: reply_summary.into(),
            emotion,
            timestamp: Utc::now(),
        }
    }

    /// Reference id used in `mem_refs`, e.g. `event:2026-08-06#3`.
    pub fn ref_id(&self) -> String {
        format!("event:{}#{}", self.timestamp.format("%Y-%m-%d"), self.turn_index)
    }
}

/// A durable summarized fact about a player/NPC relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermFact {
    pub player_id: String,
    pub npc_id: String,
    pub fact: String,
    pub emotion: Emotion,
    pub timestamp: DateTime<Utc>,
    /// Turn index of the newest event in the summarized batch.
    pub source_turn: u64,
}

impl LongTermFact {
    /// Reference id used in `mem_refs`.
    pub fn ref_id(&self) -> String {
        format!(
            "event:{}#{}",
            self.timestamp.format("%Y-%m-%d"),
            self.source_turn
        )
    }
}

/// Receipt from an append: whether the summarizer should run, and a
/// chronological snapshot of the window to summarize.
#[derive(Debug, Clone)]
pub struct AppendReceipt {
    pub summarize_due: bool,
    pub window: Vec<MemoryEvent>,
}

#[derive(Debug, Default)]
struct PairMemory {
    events: VecDeque<MemoryEvent>,
    appended_total: u64,
    last_summarized_total: u64,
    longterm: Vec<LongTermFact>,
}

/// The per-pair memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pairs: Arc<Mutex<HashMap<(String, String), Arc<Mutex<PairMemory>>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn pair(&self, npc_id: &str, player_id: &str) -> Arc<Mutex<PairMemory>> {
        let mut pairs = self.pairs.lock().await;
        pairs
            .entry((npc_id.to_string(), player_id.to_string()))
            .or_default()
            .clone()
    }

    /// Append a turn event to the pair's window, evicting the oldest when
    /// full.
    ///
    /// The summarization trigger fires exactly once per
    /// [`SUMMARIZE_EVERY`]th append: the receipt marks the batch as due and
    /// the internal marker advances immediately, so re-running with the
    /// same batch cannot duplicate long-term facts.
    pub async fn append_event(&self, mut event: MemoryEvent) -> AppendReceipt {
        let pair = self.pair(&event.npc_id, &event.player_id).await;
        let mut mem = pair.lock().await;

        mem.appended_total += 1;
        event.turn_index = mem.appended_total;
        if mem.events.len() == SHORT_WINDOW_LEN {
            mem.events.pop_front();
        }
        mem.events.push_back(event);

        let summarize_due = mem.appended_total % SUMMARIZE_EVERY == 0
            && mem.appended_total > mem.last_summarized_total;
        if summarize_due {
            mem.last_summarized_total = mem.appended_total;
            debug!(total = mem.appended_total, "summarization due");
        }

        AppendReceipt {
            summarize_due,
            window: mem.events.iter().cloned().collect(),
        }
    }

    /// The short-term window, most recent first. Length never exceeds
    /// [`SHORT_WINDOW_LEN`].
    pub async fn get_short_window(&self, npc_id: &str, player_id: &str) -> Vec<MemoryEvent> {
        let pair = self.pair(npc_id, player_id).await;
        let mem = pair.lock().await;
        mem.events.iter().rev().cloned().collect()
    }

    /// Emotion of the most recent remembered turn, if any.
    pub async fn last_emotion(&self, npc_id: &str, player_id: &str) -> Option<Emotion> {
        let pair = self.pair(npc_id, player_id).await;
        let mem = pair.lock().await;
        mem.events.back().map(|e| e.emotion)
    }

    /// Append a long-term fact. Facts are never edited in place.
    pub async fn write_longterm(&self, fact: LongTermFact) {
        let pair = self.pair(&fact.npc_id, &fact.player_id).await;
        let mut mem = pair.lock().await;
        mem.longterm.push(fact);
    }

    /// Retrieve long-term facts relevant to the utterance: token-overlap
    /// score descending, ties broken by recency. Irrelevant facts (zero
    /// overlap) are not returned.
    pub async fn recall(
        &self,
        npc_id: &str,
        player_id: &str,
        utterance: &str,
        k: usize,
    ) -> Vec<LongTermFact> {
        let query = crate::text::token_set(utterance);
        let pair = self.pair(npc_id, player_id).await;
        let mem = pair.lock().await;

        let mut scored: Vec<(usize, &LongTermFact)> = mem
            .longterm
            .iter()
            .map(|f| (crate::text::overlap(&query, &f.fact), f))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.timestamp.cmp(&a.1.timestamp)));
        scored.into_iter().take(k).map(|(_, f)| f.clone()).collect()
    }

    /// Number of long-term facts stored for a pair.
    pub async fn longterm_count(&self, npc_id: &str, player_id: &str) -> usize {
        let pair = self.pair(npc_id, player_id).await;
        let mem = pair.lock().await;
        mem.longterm.len()
    }
}

/// Summarizes a short-term window into long-term facts via the oracle.
pub struct MemorySummarizer {
    oracle: Arc<dyn Oracle>,
    timeout: Duration,
}

impl MemorySummarizer {
    /// Create a summarizer over the given oracle.
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extract 1-3 persistent facts from the window.
    ///
    /// Candidates are gated through the same taboo/secret/unknown-entity
    /// checks the guardrail applies to utterances before they may be
    /// written back. Oracle failure returns an empty list; the window
    /// itself is untouched either way.
    pub async fn summarize(
        &self,
        window: &[MemoryEvent],
        persona: &Persona,
        lore: &LoreBook,
    ) -> Vec<LongTermFact> {
        if window.is_empty() {
            return Vec::new();
        }

        let dialogue: String = window
            .iter()
            .map(|e| format!("Player: {}\n{}: {}", e.utterance, persona.name, e.reply_summary))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "From the following dialogue, extract 1-3 persistent facts about the \
             relationship between {npc} and the player.\n\
             Return ONLY a JSON list; each item must contain: \
             \"fact\" (string) and \"emotion\" (one of neutral, friendly, cheerful, \
             serious, annoyed, sad).\n\nDialogue:\n{dialogue}",
            npc = persona.name,
        );

        let request = CompletionRequest::new(prompt)
            .with_max_tokens(200)
            .with_temperature(0.2);

        let completion = match tokio::time::timeout(self.timeout, self.oracle.complete(request))
            .await
        {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                warn!(error = %e, "summarizer oracle call failed, skipping write");
                return Vec::new();
            }
            Err(_) => {
                warn!("summarizer oracle call timed out, skipping write");
                return Vec::new();
            }
        };

        let raw = extract_json(&completion.text);
        let items: Vec<RawFact> = match serde_json::from_str::<Vec<RawFact>>(raw) {
            Ok(items) => items,
            Err(_) => match serde_json::from_str::<RawFact>(raw) {
                Ok(item) => vec![item],
                Err(e) => {
                    warn!(error = %e, "summarizer returned malformed JSON, skipping write");
                    return Vec::new();
                }
            },
        };

        let first = window.first().expect("window is non-empty");
        let source_turn = window.last().expect("window is non-empty").turn_index;

        items
            .into_iter()
            .filter(|item| !item.fact.trim().is_empty())
            .filter(|item| guardrail::check_text(&item.fact, persona, lore).is_allow())
            .map(|item| LongTermFact {
                player_id: first.player_id.clone(),
                npc_id: first.npc_id.clone(),
                fact: item.fact.trim().to_string(),
                emotion: item
                    .emotion
                    .as_deref()
                    .and_then(Emotion::from_label)
                    .unwrap_or(Emotion::Neutral),
                timestamp: Utc::now(),
                source_turn,
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct RawFact {
    fact: String,
    #[serde(default)]
    emotion: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u32) -> MemoryEvent {
        MemoryEvent::new(
            "guard_01",
            "p1",
            format!("utterance {n}"),
            format!("reply {n}"),
            Emotion::Neutral,
        )
    }

    #[tokio::test]
    async fn test_window_never_exceeds_cap() {
        let store = MemoryStore::new();
        for n in 0..12 {
            store.append_event(event(n)).await;
            let window = store.get_short_window("guard_01", "p1").await;
            assert!(window.len() <= SHORT_WINDOW_LEN);
        }
        let window = store.get_short_window("guard_01", "p1").await;
        assert_eq!(window.len(), SHORT_WINDOW_LEN);
        // Most recent first, oldest evicted.
        assert_eq!(window[0].utterance, "utterance 11");
        assert_eq!(window[4].utterance, "utterance 7");
    }

    #[tokio::test]
    async fn test_summarize_due_every_fifth_append_exactly_once() {
        let store = MemoryStore::new();
        let mut due_at = Vec::new();
        for n in 0..15 {
            let receipt = store.append_event(event(n)).await;
            if receipt.summarize_due {
                due_at.push(n + 1);
            }
        }
        assert_eq!(due_at, vec![5, 10, 15]);
    }

    #[tokio::test]
    async fn test_pairs_are_independent() {
        let store = MemoryStore::new();
        for n in 0..5 {
            store.append_event(event(n)).await;
        }
        let other = MemoryEvent::new("smith_02", "p1", "hello", "hm", Emotion::Neutral);
        store.append_event(other).await;

        assert_eq!(store.get_short_window("guard_01", "p1").await.len(), 5);
        assert_eq!(store.get_short_window("smith_02", "p1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_recall_scores_by_overlap_then_recency() {
        let store = MemoryStore::new();
        let base = Utc::now();
        let fact = |text: &str, minutes: i64| LongTermFact {
            player_id: "p1".to_string(),
            npc_id: "guard_01".to_string(),
            fact: text.to_string(),
            emotion: Emotion::Neutral,
            timestamp: base + chrono::Duration::minutes(minutes),
            source_turn: 5,
        };
        store
            .write_longterm(fact("The player helped at the east gate", 0))
            .await;
        store
            .write_longterm(fact("The player asked about the market", 1))
            .await;
        store
            .write_longterm(fact("The player likes apples", 2))
            .await;

        let recalled = store.recall("guard_01", "p1", "back at the east gate", 3).await;
        assert_eq!(recalled[0].fact, "The player helped at the east gate");
        // Zero-overlap facts are not recalled.
        assert!(recalled.iter().all(|f| !f.fact.contains("apples")));
    }

    #[tokio::test]
    async fn test_last_emotion_tracks_newest_event() {
        let store = MemoryStore::new();
        assert_eq!(store.last_emotion("guard_01", "p1").await, None);

        let mut e = event(0);
        e.emotion = Emotion::Annoyed;
        store.append_event(e).await;
        assert_eq!(
            store.last_emotion("guard_01", "p1").await,
            Some(Emotion::Annoyed)
        );
    }

    #[tokio::test]
    async fn test_turn_index_is_monotonic() {
        let store = MemoryStore::new();
        for _ in 0..7 {
            store.append_event(event(0)).await;
        }
        let window = store.get_short_window("guard_01", "p1").await;
        assert_eq!(window[0].turn_index, 7);
        assert_eq!(window[4].turn_index, 3);
    }
}
