//! Out-of-character risk judgment.
//!
//! The oracle is used as a judge over the finalized text. Judgment is
//! advisory observability plus a downgrade trigger; the hard safety
//! decisions (secrets, taboo topics, entity whitelist) already happened
//! earlier in the pipeline, so a failed judge call fails open to zero
//! risk rather than surfacing an error.

use crate::turn::TurnContext;
use oracle::{extract_json, CompletionRequest, Oracle};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// OOC judgment settings.
#[derive(Debug, Clone, Copy)]
pub struct OocConfig {
    /// Risk above this forces a downgrade retry, then a denial.
    pub high_risk_threshold: f32,
}

impl Default for OocConfig {
    fn default() -> Self {
        Self {
            high_risk_threshold: 0.7,
        }
    }
}

impl OocConfig {
    /// Set the high-risk threshold.
    pub fn with_high_risk_threshold(mut self, threshold: f32) -> Self {
        self.high_risk_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

#[derive(Deserialize)]
struct JudgeResponse {
    #[serde(default)]
    ooc_risk: f32,
    #[serde(default)]
    reasons: Vec<String>,
}

/// Judges finalized replies for character breaks and disclosure risk.
pub struct OocChecker {
    oracle: Arc<dyn Oracle>,
    config: OocConfig,
    timeout: Duration,
}

impl OocChecker {
    /// Create a checker over the given oracle.
    pub fn new(oracle: Arc<dyn Oracle>, config: OocConfig) -> Self {
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

    /// The configured high-risk threshold.
    pub fn high_risk_threshold(&self) -> f32 {
        self.config.high_risk_threshold
    }

    /// Score the risk of the finalized text, in [0, 1].
    pub async fn judge(&self, ctx: &TurnContext<'_>, text: &str) -> f32 {
        let prompt = format!(
            "You are auditing an NPC reply for out-of-character content.\n\
             NPC: {name}, {role}. Speaking style: {style}.\n\
             Player said: \"{utterance}\"\n\
             NPC reply: \"{text}\"\n\n\
             Score how likely the reply breaks character, violates the persona, \
             or discloses restricted information.\n\
             Respond with ONLY a JSON object: \
             {{\"ooc_risk\": 0.0, \"reasons\": []}}",
            name = ctx.persona.name,
            role = ctx.persona.role,
            style = ctx.persona.speaking_style,
            utterance = ctx.utterance,
        );

        let request = CompletionRequest::new(prompt)
            .with_max_tokens(128)
            .with_temperature(0.0);

        let completion = match tokio::time::timeout(self.timeout, self.oracle.complete(request))
            .await
        {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                warn!(error = %e, "OOC judge call failed, assuming zero risk");
                return 0.0;
            }
            Err(_) => {
                warn!("OOC judge call timed out, assuming zero risk");
                return 0.0;
            }
        };

        match serde_json::from_str::<JudgeResponse>(extract_json(&completion.text)) {
            Ok(judged) => {
                let risk = judged.ooc_risk.clamp(0.0, 1.0);
                if !judged.reasons.is_empty() {
                    debug!(risk, reasons = ?judged.reasons, "OOC judgment");
                }
                risk
            }
            Err(e) => {
                warn!(error = %e, "OOC judge returned malformed JSON, assuming zero risk");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_clamped() {
        let config = OocConfig::default().with_high_risk_threshold(2.0);
        assert_eq!(config.high_risk_threshold, 1.0);
    }

    #[test]
    fn test_judge_response_parses_with_defaults() {
        let judged: JudgeResponse = serde_json::from_str(r#"{"ooc_risk": 0.4}"#).unwrap();
        assert_eq!(judged.ooc_risk, 0.4);
        assert!(judged.reasons.is_empty());
    }
}
