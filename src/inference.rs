//! Inference service abstraction: chat messages, the provider trait, and the
//! OpenAI-compatible HTTP client.
//!
//! The extraction and canonicalization stages never talk HTTP directly — they
//! go through [`InferenceProvider`], a small `Send + Sync` trait. That keeps
//! the "ask the model to fix its own broken output" step an injectable
//! capability: tests swap in a scripted provider and exercise the recovery
//! ladder deterministically, while production uses [`OpenAiCompatClient`]
//! against any OpenAI-compatible chat-completions endpoint (vLLM, LiteLLM,
//! Ollama, the real thing).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Message role in a chat-completions request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One chat message. `image` carries an optional base64 data-URI attached to
/// the user turn as a multimodal content part.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub image: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            image: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: None,
        }
    }

    /// User turn carrying a page image as a data-URI content part.
    pub fn user_with_image(text: impl Into<String>, data_uri: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: Some(data_uri.into()),
        }
    }

    /// Assistant turn, used only by repair mode to replay a broken reply.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image: None,
        }
    }

    /// Wire representation for an OpenAI-style request body.
    fn to_wire(&self) -> Value {
        match &self.image {
            None => json!({ "role": self.role.as_str(), "content": self.text }),
            Some(uri) => json!({
                "role": self.role.as_str(),
                "content": [
                    { "type": "text", "text": self.text },
                    { "type": "image_url", "image_url": { "url": uri } },
                ],
            }),
        }
    }
}

/// Sampling knobs forwarded with each request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

/// One assistant reply plus token accounting.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Errors from an inference call. All of these are per-item transient from
/// the pipeline's point of view — the dispatcher records them and moves on.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

/// A chat-completions capable inference service.
///
/// Implementations must be cheap to share (`Arc<dyn InferenceProvider>`) and
/// safe to call concurrently from the worker pool.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Issue one bounded chat request and return the assistant reply.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, InferenceError>;
}

/// Reqwest-backed client for any OpenAI-compatible `/chat/completions`
/// endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    /// Build a client. `base_url` is the API root (e.g.
    /// `https://api.openai.com/v1`); the `/chat/completions` suffix is
    /// appended per request. The timeout bounds every call — a stalled
    /// request blocks only its own worker slot.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl InferenceProvider for OpenAiCompatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);

        let wire: Vec<Value> = messages.iter().map(ChatMessage::to_wire).collect();
        let mut body = json!({
            "model": self.model,
            "messages": wire,
        });
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = options.max_tokens {
            body["max_tokens"] = json!(n);
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        if response.status() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(InferenceError::RateLimited { retry_after_secs });
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api(format!("HTTP {status}: {text}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                InferenceError::InvalidResponse("missing choices[0].message.content".into())
            })?
            .to_string();

        let prompt_tokens = data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize;
        let completion_tokens = data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize;
        debug!(
            "chat: {} in / {} out tokens, {} chars",
            prompt_tokens,
            completion_tokens,
            content.len()
        );

        Ok(ChatResponse {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_wire_shape() {
        let m = ChatMessage::system("be terse").to_wire();
        assert_eq!(m["role"], "system");
        assert_eq!(m["content"], "be terse");
    }

    #[test]
    fn image_message_wire_shape() {
        let m = ChatMessage::user_with_image("read this", "data:image/png;base64,AAAA").to_wire();
        assert_eq!(m["role"], "user");
        assert_eq!(m["content"][0]["type"], "text");
        assert_eq!(m["content"][1]["type"], "image_url");
        assert_eq!(
            m["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn assistant_replay_is_plain_text() {
        let m = ChatMessage::assistant("{ broken").to_wire();
        assert_eq!(m["role"], "assistant");
        assert_eq!(m["content"], "{ broken");
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = OpenAiCompatClient::new("http://localhost:8000/v1/", "k", "m", 60).unwrap();
        assert_eq!(c.base_url, "http://localhost:8000/v1");
    }
}
