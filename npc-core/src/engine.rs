//! The dialogue engine.
//!
//! Wires the full turn pipeline: route → guardrail → retrieve →
//! emotion pre-hint → draft → emotion post-infer → rewrite → OOC check →
//! memory write-back. Stages short-circuit by returning
//! [`StageOutcome::Terminal`] with a finished result; no oracle failure,
//! parse failure, or risk verdict ever escapes as an error. The only error
//! `process_turn` can return is an unknown NPC id.

use crate::emotion::{Emotion, EmotionContext, EmotionEngine, EmotionWeights};
use crate::generator::{self, GeneratorConfig, GeneratorOrchestrator};
use crate::guardrail::{self, GuardrailVerdict};
use crate::memory::{LongTermFact, MemoryEvent, MemoryStore, MemorySummarizer};
use crate::ooc::{OocChecker, OocConfig};
use crate::persona::{LoreBook, Persona};
use crate::retriever::{Evidence, EvidenceRetriever, RetrieverConfig};
use crate::router::SlotRouter;
use crate::slots::{SlotConfig, SlotRegistry};
use crate::turn::{Audit, Candidate, DraftSignals, PostInfer, StageOutcome, TurnContext, TurnResult};
use crate::turnlog::{TurnLog, TurnRecord};
use chrono::Utc;
use oracle::Oracle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Words kept from the final reply when summarizing it into memory.
const REPLY_SUMMARY_WORDS: usize = 12;

/// Errors from the dialogue engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown NPC: {0}")]
    UnknownNpc(String),
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Deadline applied to every oracle call.
    pub oracle_timeout: Duration,
    pub generator: GeneratorConfig,
    pub ooc: OocConfig,
    pub retriever: RetrieverConfig,
    pub emotion_weights: EmotionWeights,
    /// Routing confidence floor below which chitchat wins.
    pub min_route_confidence: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(30),
            generator: GeneratorConfig::default(),
            ooc: OocConfig::default(),
            retriever: RetrieverConfig::default(),
            emotion_weights: EmotionWeights::default(),
            min_route_confidence: 0.15,
        }
    }
}

impl EngineConfig {
    /// Set the oracle call deadline.
    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    /// Set generator settings.
    pub fn with_generator(mut self, generator: GeneratorConfig) -> Self {
        self.generator = generator;
        self
    }

    /// Set OOC settings.
    pub fn with_ooc(mut self, ooc: OocConfig) -> Self {
        self.ooc = ooc;
        self
    }

    /// Set retriever settings.
    pub fn with_retriever(mut self, retriever: RetrieverConfig) -> Self {
        self.retriever = retriever;
        self
    }

    /// Set emotion vote weights.
    pub fn with_emotion_weights(mut self, weights: EmotionWeights) -> Self {
        self.emotion_weights = weights;
        self
    }

    /// Set the routing confidence floor.
    pub fn with_min_route_confidence(mut self, min: f32) -> Self {
        self.min_route_confidence = min;
        self
    }
}

/// The NPC dialogue engine.
pub struct DialogueEngine {
    config: EngineConfig,
    personas: HashMap<String, Persona>,
    lore: LoreBook,
    router: SlotRouter,
    emotion: EmotionEngine,
    generator: GeneratorOrchestrator,
    ooc: OocChecker,
    retriever: EvidenceRetriever,
    memory: MemoryStore,
    summarizer: MemorySummarizer,
    log: Option<TurnLog>,
}

impl DialogueEngine {
    /// Create an engine with default configuration over the given oracle.
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self::with_config(oracle, EngineConfig::default())
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(oracle: Arc<dyn Oracle>, config: EngineConfig) -> Self {
        Self {
            config,
            personas: HashMap::new(),
            lore: LoreBook::new(),
            router: SlotRouter::new(SlotRegistry::standard())
                .with_min_confidence(config.min_route_confidence),
            emotion: EmotionEngine::standard(config.emotion_weights),
            generator: GeneratorOrchestrator::new(oracle.clone(), config.generator)
                .with_timeout(config.oracle_timeout),
            ooc: OocChecker::new(oracle.clone(), config.ooc).with_timeout(config.oracle_timeout),
            retriever: EvidenceRetriever::new(config.retriever),
            memory: MemoryStore::new(),
            summarizer: MemorySummarizer::new(oracle).with_timeout(config.oracle_timeout),
            log: None,
        }
    }

    /// Register a persona.
    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.personas.insert(persona.npc_id.clone(), persona);
        self
    }

    /// Set the lore book.
    pub fn with_lore(mut self, lore: LoreBook) -> Self {
        self.lore = lore;
        self
    }

    /// Replace the slot registry.
    pub fn with_slots(mut self, registry: SlotRegistry) -> Self {
        self.router =
            SlotRouter::new(registry).with_min_confidence(self.config.min_route_confidence);
        self
    }

    /// Attach a replay log.
    pub fn with_turn_log(mut self, log: TurnLog) -> Self {
        self.log = Some(log);
        self
    }

    /// The memory store, for inspection.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Process one player utterance into a turn result.
    ///
    /// Turns for distinct (npc, player) pairs may run concurrently; the
    /// memory store serializes appends within a pair.
    pub async fn process_turn(
        &self,
        npc_id: &str,
        player_id: &str,
        utterance: &str,
    ) -> Result<TurnResult, EngineError> {
        let started = Instant::now();
        let persona = self
            .personas
            .get(npc_id)
            .ok_or_else(|| EngineError::UnknownNpc(npc_id.to_string()))?;

        let decision = self.router.route(utterance);
        let slot = decision.slot;
        debug!(npc_id, slot = %slot.id, "turn routed");

        match self.guardrail_stage(utterance, slot, persona) {
            StageOutcome::Continue(()) => {}
            StageOutcome::Terminal(result) => {
                self.log_turn(npc_id, player_id, utterance, &result, started).await;
                return Ok(result);
            }
        }

        let short_window = self.memory.get_short_window(npc_id, player_id).await;
        let last_emotion = short_window.first().map(|e| e.emotion);
        let longterm = self
            .memory
            .recall(npc_id, player_id, utterance, self.config.retriever.top_k)
            .await;

        let evidence =
            match self.evidence_stage(utterance, slot, persona, &short_window, &longterm) {
                StageOutcome::Continue(evidence) => evidence,
                StageOutcome::Terminal(result) => {
                    self.log_turn(npc_id, player_id, utterance, &result, started).await;
                    return Ok(result);
                }
            };

        let pre_ctx = EmotionContext::new(utterance, persona, slot, last_emotion);
        let pre_hint = self.emotion.pre_hint(&pre_ctx);

        let ctx = TurnContext {
            player_id,
            npc_id,
            utterance,
            persona,
            slot,
            pre_hint,
            evidence,
            short_window,
            timestamp: Utc::now(),
        };

        let best = match self.generation_stage(&ctx).await {
            StageOutcome::Continue(best) => best,
            StageOutcome::Terminal(result) => {
                self.log_turn(npc_id, player_id, utterance, &result, started).await;
                return Ok(result);
            }
        };

        // Post-generation inference is authoritative for the emotion.
        let draft = best.signals();
        let post_ctx =
            EmotionContext::new(utterance, persona, slot, last_emotion).with_draft(&draft);
        let (post_emotion, confidence) = self.emotion.post_infer(&post_ctx);

        let mut text = best.text.clone();
        let mut rewrite_applied = false;
        let mut rewrite_reason: Option<String> = None;

        if Emotion::from_label(&draft.emotion) != Some(post_emotion) {
            debug!(draft = %draft.emotion, inferred = %post_emotion, "emotion mismatch, rewriting");
            text = self.generator.rewrite(&text, post_emotion, &ctx).await;
            rewrite_applied = true;
            rewrite_reason = Some("content_emotion != draft_emotion".to_string());
        }

        let mut final_emotion = post_emotion;
        text = generator::sanitize_entities(&text, persona, &self.lore);

        let mut risk = self.ooc.judge(&ctx, &text).await;
        if risk > self.ooc.high_risk_threshold() {
            // One downgrade retry, then give up on this turn.
            let downgraded = final_emotion.downgrade();
            info!(npc_id, risk, target = %downgraded, "high OOC risk, downgrading");
            let retry = self.generator.rewrite(&text, downgraded, &ctx).await;
            let retry = generator::sanitize_entities(&retry, persona, &self.lore);
            let retry_risk = self.ooc.judge(&ctx, &retry).await;

            if retry_risk > self.ooc.high_risk_threshold() {
                warn!(npc_id, risk = retry_risk, "OOC risk persists, denying");
                let mut result = self.denial(
                    slot,
                    pre_hint,
                    downgraded,
                    guardrail::safe_fallback_text(persona),
                    retry_risk,
                    "ooc_risk",
                    ctx.evidence.iter().map(|e| e.ref_id.clone()).collect(),
                );
                result.audit.draft = draft;
                result.audit.post_infer = PostInfer {
                    emotion: post_emotion.as_str().to_string(),
                    confidence,
                };
                self.log_turn(npc_id, player_id, utterance, &result, started).await;
                return Ok(result);
            }

            text = retry;
            final_emotion = downgraded;
            risk = retry_risk;
            rewrite_applied = true;
            if rewrite_reason.is_none() {
                rewrite_reason = Some("ooc_risk_downgrade".to_string());
            }
        }

        let evidence_ids: Vec<String> = ctx.evidence.iter().map(|e| e.ref_id.clone()).collect();
        let result = TurnResult {
            slot: slot.id.clone(),
            emotion: final_emotion,
            text: text.clone(),
            ooc_risk: risk,
            mem_refs: evidence_ids.clone(),
            audit: Audit {
                pre_hint: pre_hint.as_str().to_string(),
                draft,
                post_infer: PostInfer {
                    emotion: post_emotion.as_str().to_string(),
                    confidence,
                },
                rewrite_applied,
                rewrite_reason,
                evidence_ids,
                deny_reason: None,
            },
        };

        // Memory is written only for non-denied terminal turns.
        let event = MemoryEvent::new(
            npc_id,
            player_id,
            utterance,
            summarize_reply(&text),
            final_emotion,
        );
        let receipt = self.memory.append_event(event).await;
        if receipt.summarize_due {
            let facts = self
                .summarizer
                .summarize(&receipt.window, persona, &self.lore)
                .await;
            for fact in facts {
                self.memory.write_longterm(fact).await;
            }
        }

        self.log_turn(npc_id, player_id, utterance, &result, started).await;
        Ok(result)
    }

    /// Guardrail: deny before any generation call is made.
    fn guardrail_stage(
        &self,
        utterance: &str,
        slot: &SlotConfig,
        persona: &Persona,
    ) -> StageOutcome<()> {
        match guardrail::check_text(utterance, persona, &self.lore) {
            GuardrailVerdict::Allow => StageOutcome::Continue(()),
            GuardrailVerdict::Deny(reason) => {
                info!(npc = %persona.npc_id, reason = reason.as_str(), "guardrail denial");
                StageOutcome::Terminal(self.denial(
                    slot,
                    persona.baseline_emotion,
                    persona.baseline_emotion,
                    guardrail::refusal_text(reason, persona),
                    0.0,
                    reason.as_str(),
                    Vec::new(),
                ))
            }
        }
    }

    /// Evidence retrieval. No grounding and no license to improvise
    /// degrades safely; past_story is exempt so the NPC can recollect
    /// vaguely.
    fn evidence_stage(
        &self,
        utterance: &str,
        slot: &SlotConfig,
        persona: &Persona,
        short_window: &[MemoryEvent],
        longterm: &[LongTermFact],
    ) -> StageOutcome<Vec<Evidence>> {
        let evidence = self.retriever.retrieve(
            utterance,
            slot,
            persona,
            &self.lore,
            short_window,
            longterm,
        );
        if evidence.is_empty() && !slot.is_past_story() {
            info!(npc = %persona.npc_id, slot = %slot.id, "low evidence denial");
            return StageOutcome::Terminal(self.denial(
                slot,
                persona.baseline_emotion,
                persona.baseline_emotion,
                guardrail::safe_fallback_text(persona),
                0.0,
                "low_evidence",
                Vec::new(),
            ));
        }
        StageOutcome::Continue(evidence)
    }

    /// Draft generation and ranking; owns the bounded JSON retry loop.
    async fn generation_stage(&self, ctx: &TurnContext<'_>) -> StageOutcome<Candidate> {
        let candidates = match self.generator.generate_candidates(ctx).await {
            Ok(candidates) => candidates,
            Err(failure) => {
                warn!(npc = ctx.npc_id, reason = failure.deny_reason(), "generation gave up");
                return StageOutcome::Terminal(self.denial(
                    ctx.slot,
                    ctx.pre_hint,
                    ctx.persona.baseline_emotion,
                    guardrail::safe_fallback_text(ctx.persona),
                    0.0,
                    failure.deny_reason(),
                    ctx.evidence.iter().map(|e| e.ref_id.clone()).collect(),
                ));
            }
        };

        match self.generator.rank(candidates, ctx) {
            Some(best) => StageOutcome::Continue(best),
            // Unreachable with a conforming parser, handled the same way.
            None => StageOutcome::Terminal(self.denial(
                ctx.slot,
                ctx.pre_hint,
                ctx.persona.baseline_emotion,
                guardrail::safe_fallback_text(ctx.persona),
                0.0,
                "json_parse_failure",
                Vec::new(),
            )),
        }
    }

    fn denial(
        &self,
        slot: &SlotConfig,
        pre_hint: Emotion,
        emotion: Emotion,
        text: String,
        ooc_risk: f32,
        deny_reason: &str,
        evidence_ids: Vec<String>,
    ) -> TurnResult {
        TurnResult {
            slot: slot.id.clone(),
            emotion,
            text,
            ooc_risk,
            mem_refs: Vec::new(),
            audit: Audit {
                pre_hint: pre_hint.as_str().to_string(),
                draft: DraftSignals::default(),
                post_infer: PostInfer {
                    emotion: emotion.as_str().to_string(),
                    confidence: 0.0,
                },
                rewrite_applied: false,
                rewrite_reason: None,
                evidence_ids,
                deny_reason: Some(deny_reason.to_string()),
            },
        }
    }

    async fn log_turn(
        &self,
        npc_id: &str,
        player_id: &str,
        utterance: &str,
        result: &TurnResult,
        started: Instant,
    ) {
        let Some(ref log) = self.log else {
            return;
        };
        let record = TurnRecord {
            turn_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            npc_id: npc_id.to_string(),
            player_id: player_id.to_string(),
            raw_text: utterance.to_string(),
            slot: result.slot.clone(),
            final_text: result.text.clone(),
            emotion_pre: Emotion::from_label(&result.audit.pre_hint)
                .unwrap_or(Emotion::Neutral),
            emotion_final: result.emotion,
            ooc_risk: result.ooc_risk,
            deny_reason: result.audit.deny_reason.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
        };
        if let Err(e) = log.append(&record).await {
            warn!(error = %e, "turn log append failed");
        }
    }
}

fn summarize_reply(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= REPLY_SUMMARY_WORDS {
        text.to_string()
    } else {
        words[..REPLY_SUMMARY_WORDS].join(" ")
    }
}
