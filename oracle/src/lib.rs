//! Minimal client for the external dialogue-generation oracle.
//!
//! The oracle is any chat-completion endpoint that accepts a structured
//! prompt and returns raw text. This crate provides:
//! - The [`Oracle`] trait, the seam mocked in tests
//! - [`HttpOracle`], a client for OpenAI-compatible chat endpoints
//! - [`extract_json`] for stripping markdown fences from model output

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Errors that can occur when calling the oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Request timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },
}

/// A completion request sent to the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Optional system prompt framing the call.
    pub system: Option<String>,
    /// The user-turn prompt.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// Sampling temperature (0.0 - 1.0).
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a new request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 256,
            temperature: None,
        }
    }

    /// Set the system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens.
    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp.clamp(0.0, 1.0));
        self
    }
}

/// A completion returned by the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Raw text of the completion.
    pub text: String,
    /// Model that produced it, when known.
    pub model: Option<String>,
}

impl Completion {
    /// Wrap plain text as a completion.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
        }
    }
}

/// Core trait for oracle providers.
///
/// Everything the dialogue core asks of the outside model world goes
/// through this seam: candidate generation, tone rewrites, OOC judgment,
/// and memory summarization are all plain completions with different
/// prompts.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send a completion request and return the raw text response.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, OracleError>;

    /// Get the provider name.
    fn name(&self) -> &str;
}

/// Oracle client for OpenAI-compatible chat-completion endpoints.
#[derive(Clone)]
pub struct HttpOracle {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl HttpOracle {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a client from the ORACLE_API_KEY environment variable.
    ///
    /// ORACLE_BASE_URL and ORACLE_MODEL override the endpoint and model
    /// when set.
    pub fn from_env() -> Result<Self, OracleError> {
        let api_key = std::env::var("ORACLE_API_KEY").map_err(|_| OracleError::NoApiKey)?;
        let mut oracle = Self::new(api_key);
        if let Ok(base) = std::env::var("ORACLE_BASE_URL") {
            oracle.base_url = base;
        }
        if let Ok(model) = std::env::var("ORACLE_MODEL") {
            oracle.model = model;
        }
        Ok(oracle)
    }

    /// Set the model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the endpoint base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, OracleError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| OracleError::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, OracleError> {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ApiMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let api_request = ApiRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.build_headers()?)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OracleError::Parse("response contained no choices".to_string()))?;

        Ok(Completion {
            text,
            model: Some(api_response.model),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: String,
}

/// Extract JSON from a response that might have markdown code blocks.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json specifier)
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}
