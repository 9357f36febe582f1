//! Persona and lore reference data.
//!
//! Personas and lore facts are loaded externally (CSV compilation is a
//! collaborator, not part of this core) and treated as immutable tables
//! during a turn. Secret-visibility facts exist only so the guardrail can
//! recognize what must not be discussed; they are never surfaced.

use crate::emotion::Emotion;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// An NPC persona: speaking style, emotional baseline, and disclosure
/// policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Stable NPC identifier.
    pub npc_id: String,
    /// Display name.
    pub name: String,
    /// Role in the world, e.g. "gate guard".
    pub role: String,
    /// Short description of how the NPC talks, e.g. "formal, brief".
    pub speaking_style: String,
    /// Resting emotion when nothing pushes elsewhere.
    pub baseline_emotion: Emotion,
    /// Topics the NPC refuses to discuss at all.
    pub taboo_topics: Vec<String>,
    /// Entities whose existence must never be disclosed.
    pub secret_entities: Vec<String>,
    /// Entities the NPC may name in replies.
    pub allowed_entities: Vec<String>,
    /// Lore tags the NPC may draw on.
    pub allowed_tags: Vec<String>,
    /// Per-slot tone overrides.
    pub tone_guidelines: HashMap<String, Emotion>,
    /// Optional fixed refusal line used for guardrail denials.
    pub denial_template: Option<String>,
}

impl Persona {
    /// Create a persona with neutral defaults.
    pub fn new(npc_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            npc_id: npc_id.into(),
            name: name.into(),
            role: String::new(),
            speaking_style: "plain".to_string(),
            baseline_emotion: Emotion::Neutral,
            taboo_topics: Vec::new(),
            secret_entities: Vec::new(),
            allowed_entities: Vec::new(),
            allowed_tags: Vec::new(),
            tone_guidelines: HashMap::new(),
            denial_template: None,
        }
    }

    /// Set the role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Set the speaking style.
    pub fn with_speaking_style(mut self, style: impl Into<String>) -> Self {
        self.speaking_style = style.into();
        self
    }

    /// Set the baseline emotion.
    pub fn with_baseline_emotion(mut self, emotion: Emotion) -> Self {
        self.baseline_emotion = emotion;
        self
    }

    /// Set taboo topics.
    pub fn with_taboo_topics(mut self, topics: Vec<String>) -> Self {
        self.taboo_topics = topics;
        self
    }

    /// Set secret entities.
    pub fn with_secret_entities(mut self, entities: Vec<String>) -> Self {
        self.secret_entities = entities;
        self
    }

    /// Set allowed entities.
    pub fn with_allowed_entities(mut self, entities: Vec<String>) -> Self {
        self.allowed_entities = entities;
        self
    }

    /// Set allowed lore tags.
    pub fn with_allowed_tags(mut self, tags: Vec<String>) -> Self {
        self.allowed_tags = tags;
        self
    }

    /// Set the tone for a slot.
    pub fn with_tone(mut self, slot_id: impl Into<String>, tone: Emotion) -> Self {
        self.tone_guidelines.insert(slot_id.into(), tone);
        self
    }

    /// Set a fixed denial line.
    pub fn with_denial_template(mut self, template: impl Into<String>) -> Self {
        self.denial_template = Some(template.into());
        self
    }

    /// Tone guideline for a slot, if configured.
    pub fn tone_for(&self, slot_id: &str) -> Option<Emotion> {
        self.tone_guidelines.get(slot_id).copied()
    }

    /// Case-insensitive allowlist check for an entity name.
    pub fn is_allowed_entity(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.allowed_entities
            .iter()
            .any(|e| e.to_lowercase() == name)
    }
}

/// Visibility of a lore fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Secret,
}

/// A single immutable lore fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoreFact {
    /// Stable identifier, referenced as `lore:<id>`.
    pub id: String,
    pub visibility: Visibility,
    /// Entities this fact is about.
    pub entities: Vec<String>,
    /// Topic tags used by slot constraints.
    pub tags: Vec<String>,
    /// The fact text.
    pub text: String,
}

impl LoreFact {
    /// Create a public fact.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            visibility: Visibility::Public,
            entities: Vec::new(),
            tags: Vec::new(),
            text: text.into(),
        }
    }

    /// Mark this fact secret.
    pub fn secret(mut self) -> Self {
        self.visibility = Visibility::Secret;
        self
    }

    /// Set the entities.
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = entities;
        self
    }

    /// Set the tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Reference id used in `mem_refs`.
    pub fn ref_id(&self) -> String {
        format!("lore:{}", self.id)
    }

    /// Case-insensitive tag check.
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags.iter().any(|t| t.to_lowercase() == tag)
    }
}

/// The lore table for a world, in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoreBook {
    facts: Vec<LoreFact>,
}

impl LoreBook {
    /// Create an empty lore book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fact, preserving declaration order.
    pub fn add_fact(&mut self, fact: LoreFact) {
        self.facts.push(fact);
    }

    /// Build from a fact list.
    pub fn from_facts(facts: Vec<LoreFact>) -> Self {
        Self { facts }
    }

    /// All facts in declaration order.
    pub fn facts(&self) -> &[LoreFact] {
        &self.facts
    }

    /// Public facts only.
    pub fn public_facts(&self) -> impl Iterator<Item = &LoreFact> {
        self.facts
            .iter()
            .filter(|f| f.visibility == Visibility::Public)
    }

    /// Look up a fact by id.
    pub fn get(&self, id: &str) -> Option<&LoreFact> {
        self.facts.iter().find(|f| f.id == id)
    }

    /// Lowercased names of every entity known to the lore, public or
    /// secret. Used for unknown-entity detection and whitelist
    /// substitution.
    pub fn entity_universe(&self) -> HashSet<String> {
        self.facts
            .iter()
            .flat_map(|f| f.entities.iter())
            .map(|e| e.to_lowercase())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_builders() {
        let persona = Persona::new("guard_01", "Bram")
            .with_role("gate guard")
            .with_speaking_style("formal, brief")
            .with_baseline_emotion(Emotion::Serious)
            .with_tone("greeting", Emotion::Friendly);

        assert_eq!(persona.npc_id, "guard_01");
        assert_eq!(persona.baseline_emotion, Emotion::Serious);
        assert_eq!(persona.tone_for("greeting"), Some(Emotion::Friendly));
        assert_eq!(persona.tone_for("trade"), None);
    }

    #[test]
    fn test_allowed_entity_is_case_insensitive() {
        let persona = Persona::new("guard_01", "Bram")
            .with_allowed_entities(vec!["Elira".to_string(), "TownInn".to_string()]);
        assert!(persona.is_allowed_entity("elira"));
        assert!(persona.is_allowed_entity("ELIRA"));
        assert!(!persona.is_allowed_entity("Baron"));
    }

    #[test]
    fn test_lore_book_visibility_split() {
        let mut lore = LoreBook::new();
        lore.add_fact(LoreFact::new("l1", "The market opens at dawn."));
        lore.add_fact(LoreFact::new("l2", "The vault code is 4-7-1.").secret());

        assert_eq!(lore.facts().len(), 2);
        assert_eq!(lore.public_facts().count(), 1);
        assert_eq!(lore.get("l2").unwrap().visibility, Visibility::Secret);
    }

    #[test]
    fn test_entity_universe_includes_secret_entities() {
        let lore = LoreBook::from_facts(vec![
            LoreFact::new("l1", "Elira runs the inn.")
                .with_entities(vec!["Elira".to_string()]),
            LoreFact::new("l2", "The Baron hoards grain.")
                .secret()
                .with_entities(vec!["Baron".to_string()]),
        ]);
        let universe = lore.entity_universe();
        assert!(universe.contains("elira"));
        assert!(universe.contains("baron"));
    }
}
