//! LLM client — an OpenAI-compatible `/chat/completions` caller behind an
//! object-safe trait so tests can substitute a scripted double.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::DEFAULT_MAX_TOKENS;
use crate::error::NodeError;

/// Hard per-call timeout for LLM requests.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// One completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
            top_p: None,
        }
    }
}

/// LLM call failures.  `is_transient` drives the agent's retry policy.
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM API rate limit exceeded")]
    RateLimited,

    #[error("LLM API call timed out")]
    Timeout,

    #[error("LLM API authentication failed; check LLM_API_KEY")]
    Auth,

    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response from LLM API: {0}")]
    InvalidResponse(String),

    #[error("LLM API key not configured; set LLM_API_KEY")]
    MissingApiKey,
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited | Self::Timeout)
    }
}

impl From<LlmError> for NodeError {
    fn from(e: LlmError) -> Self {
        if e.is_transient() {
            NodeError::Upstream(e.to_string())
        } else {
            NodeError::Internal(e.to_string())
        }
    }
}

/// Capability contract the engine consumes; the provider behind it is an
/// external collaborator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for any OpenAI-compatible completion endpoint.
///
/// The API key is held in memory only; it is sent as a bearer header and
/// never logged or persisted.
pub struct HttpLlmClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key,
        }
    }

    /// Build from `LLM_API_BASE` / `LLM_API_KEY`.
    pub fn from_env() -> Self {
        let api_base = std::env::var("LLM_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("LLM_API_KEY").ok();
        Self::new(api_base, api_key)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;

        let body = ChatRequest {
            model: &request.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature.unwrap_or(0.7),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            top_p: request.top_p,
        };

        info!(
            model = %request.model,
            prompt_length = request.prompt.len(),
            "calling LLM API"
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .timeout(LLM_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(LlmError::Auth);
        }
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .map(|e| e.message)
                .unwrap_or_else(|| "LLM API request failed".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices returned".to_string()))?;

        info!(response_length = content.len(), "LLM API call completed");
        Ok(content)
    }
}
