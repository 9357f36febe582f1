//! Candidate generation, ranking, and finalization support.
//!
//! The orchestrator owns every oracle call that produces reply text: the
//! candidate batch (one call returning an n-item JSON list, retried up to
//! the configured bound), and the tone rewrite. It also enforces the hard
//! token ceiling and the entity whitelist substitution applied to any text
//! that leaves the pipeline.

use crate::emotion::Emotion;
use crate::persona::{LoreBook, Persona};
use crate::turn::{Candidate, TurnContext};
use oracle::{extract_json, CompletionRequest, Oracle};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Generic descriptor substituted for entities outside the allowlist.
const GENERIC_DESCRIPTOR: &str = "someone";

/// Generation and ranking settings.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    /// Candidates requested per batch.
    pub candidates: usize,
    /// Hard ceiling on reply length in whitespace tokens.
    pub max_new_tokens: usize,
    /// Extra attempts after the first malformed batch.
    pub json_retry: usize,
    /// Length the ranking penalty is centered on.
    pub ideal_reply_tokens: usize,
    pub style_weight: f32,
    pub emotion_weight: f32,
    pub length_weight: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            candidates: 3,
            max_new_tokens: 64,
            json_retry: 2,
            ideal_reply_tokens: 25,
            style_weight: 0.5,
            emotion_weight: 0.3,
            length_weight: 0.2,
        }
    }
}

impl GeneratorConfig {
    /// Set the number of candidates per batch.
    pub fn with_candidates(mut self, n: usize) -> Self {
        self.candidates = n;
        self
    }

    /// Set the JSON retry bound.
    pub fn with_json_retry(mut self, retries: usize) -> Self {
        self.json_retry = retries;
        self
    }
}

/// Why candidate generation gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationFailure {
    /// The oracle responded, but never with parseable candidates.
    Malformed,
    /// The oracle never responded at all (transport errors or timeouts).
    OracleUnavailable,
}

impl GenerationFailure {
    /// The `deny_reason` recorded when the turn recovers into a denial.
    pub fn deny_reason(&self) -> &'static str {
        match self {
            GenerationFailure::Malformed => "json_parse_failure",
            GenerationFailure::OracleUnavailable => "oracle_unavailable",
        }
    }
}

/// Produces and ranks candidate replies through the oracle.
pub struct GeneratorOrchestrator {
    oracle: Arc<dyn Oracle>,
    config: GeneratorConfig,
    timeout: Duration,
}

impl GeneratorOrchestrator {
    /// Create an orchestrator over the given oracle.
    pub fn new(oracle: Arc<dyn Oracle>, config: GeneratorConfig) -> Self {
        Self {
            oracle,
            config,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate a candidate batch, retrying malformed output up to the
    /// configured bound.
    ///
    /// The oracle is called at most `json_retry + 1` times; exhaustion
    /// returns the failure kind so the engine can recover into a
    /// structured denial.
    pub async fn generate_candidates(
        &self,
        ctx: &TurnContext<'_>,
    ) -> Result<Vec<Candidate>, GenerationFailure> {
        let prompt = self.build_draft_prompt(ctx);
        let mut saw_completion = false;

        for attempt in 0..=self.config.json_retry {
            let request = CompletionRequest::new(prompt.clone())
                .with_system(self.build_system_prompt(ctx.persona))
                .with_max_tokens(self.config.max_new_tokens * self.config.candidates + 128)
                .with_temperature(0.8);

            let completion =
                match tokio::time::timeout(self.timeout, self.oracle.complete(request)).await {
                    Ok(Ok(completion)) => completion,
                    Ok(Err(e)) => {
                        warn!(attempt, error = %e, "candidate generation call failed");
                        continue;
                    }
                    Err(_) => {
                        warn!(attempt, "candidate generation call timed out");
                        continue;
                    }
                };

            saw_completion = true;
            match parse_candidates(&completion.text) {
                Some(candidates) => {
                    debug!(attempt, count = candidates.len(), "candidates parsed");
                    return Ok(candidates
                        .into_iter()
                        .map(|mut c| {
                            c.text = self.truncate(&c.text);
                            c
                        })
                        .collect());
                }
                None => {
                    warn!(attempt, "candidate batch failed to parse");
                }
            }
        }

        if saw_completion {
            Err(GenerationFailure::Malformed)
        } else {
            Err(GenerationFailure::OracleUnavailable)
        }
    }

    /// Rank candidates and return the winner.
    ///
    /// Additive heuristic: speaking-style match, emotion match against the
    /// pre-hint, minus a length penalty around the ideal reply length.
    pub fn rank(&self, mut candidates: Vec<Candidate>, ctx: &TurnContext<'_>) -> Option<Candidate> {
        for candidate in &mut candidates {
            candidate.score = self.score(candidate, ctx);
        }
        candidates
            .into_iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
    }

    fn score(&self, candidate: &Candidate, ctx: &TurnContext<'_>) -> f32 {
        let style_words: Vec<&str> = ctx
            .persona
            .speaking_style
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let text_lower = candidate.text.to_lowercase();
        let style_match = if style_words.is_empty() {
            0.0
        } else {
            style_words
                .iter()
                .filter(|w| text_lower.contains(&w.to_lowercase()))
                .count() as f32
                / style_words.len() as f32
        };

        let emotion_match = match Emotion::from_label(&candidate.emotion) {
            Some(e) if e == ctx.pre_hint => 1.0,
            Some(_) => 0.0,
            None => 0.0,
        };

        let len = candidate.text.split_whitespace().count() as f32;
        let ideal = self.config.ideal_reply_tokens as f32;
        let length_penalty = (len - ideal).abs() / ideal;

        self.config.style_weight * style_match + self.config.emotion_weight * emotion_match
            - self.config.length_weight * length_penalty
    }

    /// Enforce the hard token ceiling.
    pub fn truncate(&self, text: &str) -> String {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() <= self.config.max_new_tokens {
            text.trim().to_string()
        } else {
            tokens[..self.config.max_new_tokens].join(" ")
        }
    }

    /// Ask the oracle to re-tone a draft, keeping facts unchanged.
    ///
    /// On any failure the draft survives as-is; the inferred emotion still
    /// applies to the turn result.
    pub async fn rewrite(&self, text: &str, target: Emotion, ctx: &TurnContext<'_>) -> String {
        let prompt = format!(
            "Rewrite the following reply so that its tone and emotion become '{target}'. \
             Keep the same facts and details; do not add or remove information. \
             Stay in character as {name}, {role}. \
             Return only the rewritten text.\n\nOriginal: {text}",
            name = ctx.persona.name,
            role = ctx.persona.role,
        );
        let request = CompletionRequest::new(prompt)
            .with_max_tokens(self.config.max_new_tokens + 32)
            .with_temperature(0.6);

        match tokio::time::timeout(self.timeout, self.oracle.complete(request)).await {
            Ok(Ok(completion)) => {
                let rewritten = completion.text.trim();
                if rewritten.is_empty() {
                    text.to_string()
                } else {
                    self.truncate(rewritten.trim_matches('"'))
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "rewrite call failed, keeping draft");
                text.to_string()
            }
            Err(_) => {
                warn!("rewrite call timed out, keeping draft");
                text.to_string()
            }
        }
    }

    fn build_system_prompt(&self, persona: &Persona) -> String {
        format!(
            "You are {name}, {role}. Speaking style: {style}. \
             Stay in character; never reveal secrets or break the fourth wall.",
            name = persona.name,
            role = persona.role,
            style = persona.speaking_style,
        )
    }

    fn build_draft_prompt(&self, ctx: &TurnContext<'_>) -> String {
        let mut prompt = String::new();

        if !ctx.evidence.is_empty() {
            prompt.push_str("## Known facts\n");
            for item in &ctx.evidence {
                prompt.push_str(&format!("- {}\n", item.text));
            }
            prompt.push('\n');
        }

        if !ctx.short_window.is_empty() {
            prompt.push_str("## Recent conversation (newest first)\n");
            for event in &ctx.short_window {
                prompt.push_str(&format!(
                    "- Player: {} / You: {}\n",
                    event.utterance, event.reply_summary
                ));
            }
            prompt.push('\n');
        }

        if ctx.slot.is_past_story() {
            prompt.push_str(
                "The player asks about your past. You may recollect vaguely, with \
                 hedged memory-like phrasing; do not invent named people or places.\n\n",
            );
        }

        prompt.push_str(&format!(
            "The player says: \"{utterance}\"\n\
             Intent category: {slot}. Lean toward a {tone} tone.\n\
             Generate {n} candidate replies as a JSON list. Each item must have \
             exactly these fields:\n\
             {{\"reply\": \"...\", \"emotion\": \"neutral|friendly|cheerful|serious|annoyed|sad\", \
             \"self_report\": \"one short phrase on how you feel\", \
             \"sentiment\": \"positive|negative|neutral\"}}\n\
             Keep each reply under {max_words} words. Return ONLY the JSON list.",
            utterance = ctx.utterance,
            slot = ctx.slot.id,
            tone = ctx.pre_hint,
            n = self.config.candidates,
            max_words = self.config.max_new_tokens,
        ));

        prompt
    }
}

/// Replace entity mentions outside the allowlist with a generic
/// descriptor.
///
/// A token counts as an entity mention when it names a known lore or
/// secret entity (case-insensitive), or when it is a capitalized purely
/// alphabetic word not at a sentence start.
pub fn sanitize_entities(text: &str, persona: &Persona, lore: &LoreBook) -> String {
    let universe = lore.entity_universe();

    let mut out: Vec<String> = Vec::new();
    let mut sentence_start = true;
    for word in text.split_whitespace() {
        let core: String = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_string();
        let replaced = if core.len() > 1 && is_entity_mention(&core, &universe, sentence_start) {
            if persona.is_allowed_entity(&core) {
                word.to_string()
            } else {
                word.replacen(&core, GENERIC_DESCRIPTOR, 1)
            }
        } else {
            word.to_string()
        };
        sentence_start = word.ends_with(['.', '!', '?']);
        out.push(replaced);
    }
    out.join(" ")
}

fn is_entity_mention(
    core: &str,
    universe: &std::collections::HashSet<String>,
    sentence_start: bool,
) -> bool {
    if universe.contains(&core.to_lowercase()) {
        return true;
    }
    !sentence_start
        && core.chars().all(|c| c.is_alphabetic())
        && core.chars().next().is_some_and(|c| c.is_uppercase())
}

#[derive(Deserialize)]
struct RawCandidate {
    reply: String,
    #[serde(default)]
    emotion: String,
    #[serde(default)]
    self_report: String,
    #[serde(default)]
    sentiment: String,
}

impl RawCandidate {
    fn into_candidate(self) -> Candidate {
        Candidate {
            text: self.reply.trim().to_string(),
            emotion: if self.emotion.is_empty() {
                "neutral".to_string()
            } else {
                self.emotion
            },
            self_report: self.self_report,
            sentiment: if self.sentiment.is_empty() {
                "neutral".to_string()
            } else {
                self.sentiment
            },
            score: 0.0,
        }
    }
}

/// Parse a candidate batch from raw oracle output. Accepts a JSON list or
/// a single object; returns None when nothing usable parses.
fn parse_candidates(raw: &str) -> Option<Vec<Candidate>> {
    let json = extract_json(raw);

    let raws: Vec<RawCandidate> = match serde_json::from_str::<Vec<RawCandidate>>(json) {
        Ok(list) => list,
        Err(_) => match serde_json::from_str::<RawCandidate>(json) {
            Ok(single) => vec![single],
            Err(_) => return None,
        },
    };

    let candidates: Vec<Candidate> = raws
        .into_iter()
        .map(RawCandidate::into_candidate)
        .filter(|c| !c.text.is_empty())
        .collect();

    if candidates.is_empty() {
        None
    } else {
        Some(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::LoreFact;

    fn persona() -> Persona {
        Persona::new("guard_01", "Bram")
            .with_speaking_style("formal, brief")
            .with_allowed_entities(vec!["Elira".to_string()])
    }

    fn lore() -> LoreBook {
        LoreBook::from_facts(vec![
            LoreFact::new("l1", "Elira runs the inn.").with_entities(vec!["Elira".to_string()]),
            LoreFact::new("l2", "The Baron hoards grain.")
                .secret()
                .with_entities(vec!["Baron".to_string()]),
        ])
    }

    #[test]
    fn test_parse_candidates_list() {
        let raw = r#"[{"reply": "Aye.", "emotion": "neutral", "self_report": "fine", "sentiment": "neutral"},
                      {"reply": "Move along.", "emotion": "serious", "self_report": "wary", "sentiment": "negative"}]"#;
        let candidates = parse_candidates(raw).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].emotion, "serious");
    }

    #[test]
    fn test_parse_candidates_single_object_and_fences() {
        let raw = "```json\n{\"reply\": \"Aye.\"}\n```";
        let candidates = parse_candidates(raw).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].emotion, "neutral");
        assert_eq!(candidates[0].sentiment, "neutral");
    }

    #[test]
    fn test_parse_candidates_rejects_garbage() {
        assert!(parse_candidates("the oracle rambles freely").is_none());
        assert!(parse_candidates(r#"[{"no_reply_field": 1}]"#).is_none());
        assert!(parse_candidates(r#"[{"reply": "   "}]"#).is_none());
    }

    #[test]
    fn test_truncate_enforces_ceiling() {
        let orchestrator = GeneratorOrchestrator::new(
            Arc::new(crate::testing::MockOracle::silent()),
            GeneratorConfig::default(),
        );
        let long = vec!["word"; 100].join(" ");
        let truncated = orchestrator.truncate(&long);
        assert_eq!(truncated.split_whitespace().count(), 64);

        let short = "a short reply";
        assert_eq!(orchestrator.truncate(short), short);
    }

    #[test]
    fn test_sanitize_replaces_disallowed_known_entity() {
        let text = "Ask the Baron about it.";
        let cleaned = sanitize_entities(text, &persona(), &lore());
        assert_eq!(cleaned, "Ask the someone about it.");
    }

    #[test]
    fn test_sanitize_keeps_allowed_entity() {
        let text = "Elira keeps the inn warm.";
        let cleaned = sanitize_entities(text, &persona(), &lore());
        assert!(cleaned.contains("Elira"));
    }

    #[test]
    fn test_sanitize_replaces_capitalized_unknown_mid_sentence() {
        let text = "I once served under Captain Aldric there.";
        let cleaned = sanitize_entities(text, &persona(), &lore());
        assert!(!cleaned.contains("Aldric"));
        assert!(cleaned.contains(GENERIC_DESCRIPTOR));
    }

    #[test]
    fn test_sanitize_keeps_sentence_starts_and_contractions() {
        let text = "The gate closes at dusk. I'm sure of it.";
        let cleaned = sanitize_entities(text, &persona(), &lore());
        assert_eq!(cleaned, text);
    }

    #[test]
    fn test_sanitize_preserves_punctuation() {
        let text = "Speak to Baron, not me.";
        let cleaned = sanitize_entities(text, &persona(), &lore());
        assert_eq!(cleaned, "Speak to someone, not me.");
    }
}
