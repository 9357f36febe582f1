//! Pre-generation guardrail checks and templated refusals.
//!
//! The guardrail is a pure function of persona + text: it never touches the
//! oracle. A denial here short-circuits the whole pipeline before any
//! generation call; secret material must never reach the generator. The
//! same checks gate summarized facts before long-term write-back.

use crate::persona::{LoreBook, Persona};
use crate::text::{phrase_matches, token_set};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why a guardrail denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Taboo,
    SecretEntity,
    UnknownEntity,
}

impl DenyReason {
    /// Wire label, used as `audit.deny_reason`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Taboo => "taboo",
            DenyReason::SecretEntity => "secret_entity",
            DenyReason::UnknownEntity => "unknown_entity",
        }
    }
}

/// Outcome of a guardrail check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailVerdict {
    Allow,
    Deny(DenyReason),
}

impl GuardrailVerdict {
    /// Check if this is an allow.
    pub fn is_allow(&self) -> bool {
        matches!(self, GuardrailVerdict::Allow)
    }
}

/// Check text against the persona's disclosure policy.
///
/// Matching is token-based: every content token of a taboo topic or secret
/// entity phrase must appear in the text, so "the king's secret plan"
/// still matches a `king's plan` secret. The unknown-entity check matches
/// text tokens against the lore entity universe; a known entity outside
/// the allowlist denies.
pub fn check_text(text: &str, persona: &Persona, lore: &LoreBook) -> GuardrailVerdict {
    let tokens = token_set(text);

    for topic in &persona.taboo_topics {
        if phrase_matches(&tokens, topic) {
            debug!(topic = %topic, "guardrail: taboo topic");
            return GuardrailVerdict::Deny(DenyReason::Taboo);
        }
    }

    for entity in &persona.secret_entities {
        if phrase_matches(&tokens, entity) {
            debug!(entity = %entity, "guardrail: secret entity");
            return GuardrailVerdict::Deny(DenyReason::SecretEntity);
        }
    }

    let universe = lore.entity_universe();
    for entity in &universe {
        if phrase_matches(&tokens, entity) && !persona.is_allowed_entity(entity) {
            debug!(entity = %entity, "guardrail: entity outside allowlist");
            return GuardrailVerdict::Deny(DenyReason::UnknownEntity);
        }
    }

    GuardrailVerdict::Allow
}

/// Build the in-character refusal for a denial.
///
/// A persona-level denial template wins outright; otherwise each reason
/// has its own template, adjusted to the persona's speaking style.
pub fn refusal_text(reason: DenyReason, persona: &Persona) -> String {
    if let Some(ref template) = persona.denial_template {
        return template.clone();
    }

    let body = match reason {
        DenyReason::Taboo => {
            "I can't talk about that subject. If you'd like, we could talk about \
             the market, recent news, or an old legend instead."
        }
        DenyReason::SecretEntity => {
            "I'm sorry, I have nothing I can responsibly say on that matter. \
             I can share what is commonly known around town."
        }
        DenyReason::UnknownEntity => {
            "I can't speak for someone I haven't heard of. If you mean someone \
             from around here, give me more to go on."
        }
    };

    apply_style_prefix(body, persona)
}

/// A safe in-character fallback used for non-guardrail denials
/// (low evidence, retry exhaustion, OOC risk).
pub fn safe_fallback_text(persona: &Persona) -> String {
    apply_style_prefix(
        "I'm afraid I can't speak to that right now. Ask me something else.",
        persona,
    )
}

fn apply_style_prefix(body: &str, persona: &Persona) -> String {
    let style = persona.speaking_style.to_lowercase();
    if style.contains("cheer") || style.contains("friendly") {
        format!("Oh, I wish I could help — but {}", lowercase_first(body))
    } else if style.contains("gruff") || style.contains("stoic") {
        format!("I won't say. {body}")
    } else {
        body.to_string()
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::LoreFact;

    fn persona() -> Persona {
        Persona::new("guard_01", "Bram")
            .with_taboo_topics(vec!["smuggling routes".to_string()])
            .with_secret_entities(vec!["king's plan".to_string()])
            .with_allowed_entities(vec!["Elira".to_string()])
    }

    fn lore() -> LoreBook {
        LoreBook::from_facts(vec![
            LoreFact::new("l1", "Elira runs the Town Inn.")
                .with_entities(vec!["Elira".to_string()]),
            LoreFact::new("l2", "The Baron hoards grain.")
                .secret()
                .with_entities(vec!["Baron".to_string()]),
        ])
    }

    #[test]
    fn test_allows_plain_utterance() {
        assert!(check_text("how is the weather today?", &persona(), &lore()).is_allow());
    }

    #[test]
    fn test_denies_taboo_topic() {
        assert_eq!(
            check_text("tell me about the smuggling routes", &persona(), &lore()),
            GuardrailVerdict::Deny(DenyReason::Taboo)
        );
    }

    #[test]
    fn test_denies_secret_entity_with_interleaved_words() {
        // "king's plan" must match even with words in between.
        assert_eq!(
            check_text(
                "Can you tell me the king's secret plan?",
                &persona(),
                &lore()
            ),
            GuardrailVerdict::Deny(DenyReason::SecretEntity)
        );
    }

    #[test]
    fn test_denies_known_entity_outside_allowlist() {
        assert_eq!(
            check_text("what is the Baron up to?", &persona(), &lore()),
            GuardrailVerdict::Deny(DenyReason::UnknownEntity)
        );
    }

    #[test]
    fn test_allows_allowlisted_entity() {
        assert!(check_text("is Elira at the inn?", &persona(), &lore()).is_allow());
    }

    #[test]
    fn test_refusal_never_echoes_secret() {
        let text = refusal_text(DenyReason::SecretEntity, &persona());
        assert!(!text.to_lowercase().contains("king"));
        assert!(!text.to_lowercase().contains("plan"));
    }

    #[test]
    fn test_denial_template_overrides() {
        let persona = persona().with_denial_template("Bram shakes his head slowly.");
        assert_eq!(
            refusal_text(DenyReason::Taboo, &persona),
            "Bram shakes his head slowly."
        );
    }

    #[test]
    fn test_style_prefixes() {
        let cheery = Persona::new("x", "X").with_speaking_style("cheerful, chatty");
        assert!(refusal_text(DenyReason::Taboo, &cheery).starts_with("Oh, I wish"));

        let gruff = Persona::new("y", "Y").with_speaking_style("gruff, terse");
        assert!(refusal_text(DenyReason::Taboo, &gruff).starts_with("I won't say."));
    }
}
