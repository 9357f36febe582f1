//! Conversational slot configuration.
//!
//! A slot is a discrete intent category. Each slot carries a reference
//! vocabulary for lexical routing, hard must/forbid keyword rules on the
//! utterance, topic constraints for evidence retrieval, an optional default
//! tone, and an explicit priority used to break routing ties (lower wins).

use crate::emotion::Emotion;
use serde::{Deserialize, Serialize};

/// Id of the fallback slot returned when nothing else scores.
pub const FALLBACK_SLOT: &str = "chitchat";

/// Id of the slot exempt from the low-evidence denial, allowing vague
/// recollection-style improvisation.
pub const PAST_STORY_SLOT: &str = "past_story";

/// Configuration for one conversational slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Slot identifier, e.g. "quest_request".
    pub id: String,
    /// Reference vocabulary scored against the utterance.
    pub vocabulary: Vec<String>,
    /// Keywords that must all be present or the slot scores zero.
    pub must: Vec<String>,
    /// Keywords whose presence zeroes the slot's score.
    pub forbid: Vec<String>,
    /// Lore tags a retrieved fact should cover for this slot.
    pub required_topics: Vec<String>,
    /// Lore tags that disqualify a fact for this slot.
    pub forbidden_topics: Vec<String>,
    /// Default tone when the persona has no guideline for this slot.
    pub tone: Option<Emotion>,
    /// Tie-break priority; lower values win.
    pub priority: u8,
}

impl SlotConfig {
    /// Create a slot with an empty rule set.
    pub fn new(id: impl Into<String>, priority: u8) -> Self {
        Self {
            id: id.into(),
            vocabulary: Vec::new(),
            must: Vec::new(),
            forbid: Vec::new(),
            required_topics: Vec::new(),
            forbidden_topics: Vec::new(),
            tone: None,
            priority,
        }
    }

    /// Set the routing vocabulary.
    pub fn with_vocabulary(mut self, words: &[&str]) -> Self {
        self.vocabulary = words.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Set the must-have keywords.
    pub fn with_must(mut self, words: &[&str]) -> Self {
        self.must = words.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Set the forbidden keywords.
    pub fn with_forbid(mut self, words: &[&str]) -> Self {
        self.forbid = words.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Set the required evidence topics.
    pub fn with_topics(mut self, topics: &[&str]) -> Self {
        self.required_topics = topics.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Set the forbidden evidence topics.
    pub fn with_forbidden_topics(mut self, topics: &[&str]) -> Self {
        self.forbidden_topics = topics.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Set the default tone.
    pub fn with_tone(mut self, tone: Emotion) -> Self {
        self.tone = Some(tone);
        self
    }

    /// Whether this slot is the past-story slot.
    pub fn is_past_story(&self) -> bool {
        self.id == PAST_STORY_SLOT
    }
}

/// The set of slots an engine routes across.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotRegistry {
    slots: Vec<SlotConfig>,
}

impl SlotRegistry {
    /// Build a registry from explicit slots. A `chitchat` fallback is
    /// appended if missing.
    pub fn from_slots(mut slots: Vec<SlotConfig>) -> Self {
        if !slots.iter().any(|s| s.id == FALLBACK_SLOT) {
            slots.push(SlotConfig::new(FALLBACK_SLOT, u8::MAX));
        }
        Self { slots }
    }

    /// The standard tavern-town slot set.
    pub fn standard() -> Self {
        Self::from_slots(vec![
            SlotConfig::new("greeting", 0)
                .with_vocabulary(&[
                    "hello", "hi", "greetings", "morning", "evening", "day", "welcome", "meet",
                ])
                .with_topics(&["city"])
                .with_forbidden_topics(&["secret", "rumor"])
                .with_tone(Emotion::Friendly),
            SlotConfig::new("quest_request", 1)
                .with_vocabulary(&[
                    "quest", "task", "job", "work", "reward", "trouble", "bandit", "monster",
                    "hunt",
                ])
                .with_topics(&["city", "events"])
                .with_forbidden_topics(&["secret", "security"])
                .with_tone(Emotion::Serious),
            SlotConfig::new("trade", 2)
                .with_vocabulary(&[
                    "buy", "sell", "trade", "price", "shop", "wares", "goods", "coin", "market",
                    "merchant",
                ])
                .with_topics(&["trade", "items"])
                .with_tone(Emotion::Cheerful),
            SlotConfig::new("directions", 3)
                .with_vocabulary(&[
                    "where", "road", "gate", "path", "way", "east", "west", "north", "south",
                    "find",
                ])
                .with_topics(&["city"])
                .with_forbidden_topics(&["secret"]),
            SlotConfig::new("law_info", 4)
                .with_vocabulary(&[
                    "law", "rule", "curfew", "guard", "patrol", "legal", "crime", "punishment",
                ])
                .with_topics(&["law"])
                .with_forbidden_topics(&["secret"])
                .with_tone(Emotion::Serious),
            SlotConfig::new(PAST_STORY_SLOT, 5)
                .with_vocabulary(&[
                    "remember", "story", "past", "once", "before", "young", "memory", "old",
                    "used",
                ])
                .with_tone(Emotion::Sad),
        ])
    }

    /// All slots.
    pub fn slots(&self) -> &[SlotConfig] {
        &self.slots
    }

    /// Look up a slot by id.
    pub fn get(&self, id: &str) -> Option<&SlotConfig> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// The fallback slot.
    pub fn fallback(&self) -> &SlotConfig {
        self.get(FALLBACK_SLOT)
            .expect("registry always contains the fallback slot")
    }
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_has_fallback() {
        let registry = SlotRegistry::standard();
        assert_eq!(registry.fallback().id, FALLBACK_SLOT);
        assert_eq!(registry.fallback().priority, u8::MAX);
    }

    #[test]
    fn test_fallback_appended_when_missing() {
        let registry = SlotRegistry::from_slots(vec![SlotConfig::new("trade", 0)]);
        assert!(registry.get(FALLBACK_SLOT).is_some());
        assert_eq!(registry.slots().len(), 2);
    }

    #[test]
    fn test_past_story_detection() {
        let registry = SlotRegistry::standard();
        assert!(registry.get(PAST_STORY_SLOT).unwrap().is_past_story());
        assert!(!registry.get("trade").unwrap().is_past_story());
    }
}
