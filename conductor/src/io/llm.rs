//! Chat-completion client abstraction.
//!
//! The [`LlmClient`] trait decouples classification, planning and reflection
//! from the backend. [`OpenAiClient`] talks to any OpenAI-compatible
//! `/chat/completions` endpoint; tests use scripted clients.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::LlmConfig;

/// Failure of a single chat-completion call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Worth one retry: timeouts, connection failures, rate limits and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Network(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Malformed(_) | LlmError::Cancelled => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// One chat-completion request. The model and sampling settings come from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: system.into(),
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: user.into(),
                },
            ],
        }
    }

    /// Text of the last user message.
    pub fn user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == ChatRole::User)
            .map_or("", |message| message.content.as_str())
    }
}

/// Abstraction over chat-completion backends. Returns the assistant message text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;
}

/// Client for OpenAI-compatible chat-completion APIs.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| LlmError::Network(format!("invalid api key header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn payload(&self, request: &ChatRequest) -> Value {
        serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": self.temperature,
            "stream": false,
        })
    }

    fn map_send_error(err: &reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

/// Pull `choices[0].message.content` out of a completion body.
fn parse_content(body: &Value) -> Result<String, LlmError> {
    body.get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::Malformed("missing choices[0].message.content".to_string()))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, messages = request.messages.len(), "sending chat completion");
        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(&self.payload(&request))
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Self::map_send_error(&e))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "chat completion failed");
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::Malformed(e.to_string()))?;
        parse_content(&body)
    }
}
