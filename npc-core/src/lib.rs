//! Controllable NPC dialogue pipeline.
//!
//! This crate turns a player utterance into a persona-consistent,
//! emotionally coherent, lore-grounded NPC reply:
//! - Slot routing and pre-generation guardrails
//! - Evidence retrieval over lore and long-term memory
//! - Two-pass weighted emotion voting with rewrite-on-mismatch
//! - Candidate generation/ranking through an external oracle, with a
//!   bounded JSON retry loop
//! - Out-of-character risk judgment with downgrade recovery
//! - Short-term window + summarized long-term memory per (npc, player)
//!
//! Every turn terminates in a well-formed [`TurnResult`]; denials are
//! in-character replies with an audit trail, never errors.
//!
//! # Quick Start
//!
//! ```ignore
//! use npc_core::{DialogueEngine, LoreBook, Persona};
//! use oracle::HttpOracle;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let oracle = Arc::new(HttpOracle::from_env()?);
//!     let engine = DialogueEngine::new(oracle)
//!         .with_persona(Persona::new("guard_01", "Bram"))
//!         .with_lore(LoreBook::new());
//!
//!     let result = engine.process_turn("guard_01", "p1", "Hello there!").await?;
//!     println!("{} ({})", result.text, result.emotion);
//!     Ok(())
//! }
//! ```

pub mod emotion;
pub mod engine;
pub mod generator;
pub mod guardrail;
pub mod memory;
pub mod ooc;
pub mod persona;
pub mod retriever;
pub mod router;
pub mod slots;
pub mod testing;
pub mod text;
pub mod turn;
pub mod turnlog;

// Primary public API
pub use emotion::{Emotion, EmotionEngine, EmotionSignal, EmotionWeights};
pub use engine::{DialogueEngine, EngineConfig, EngineError};
pub use generator::GeneratorConfig;
pub use guardrail::DenyReason;
pub use memory::{LongTermFact, MemoryEvent, MemoryStore};
pub use ooc::OocConfig;
pub use persona::{LoreBook, LoreFact, Persona, Visibility};
pub use retriever::{Evidence, RetrieverConfig};
pub use slots::{SlotConfig, SlotRegistry};
pub use turn::{Audit, Candidate, TurnResult};
pub use turnlog::{TurnLog, TurnRecord};
