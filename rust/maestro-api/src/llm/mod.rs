//! LLM client abstraction.
//!
//! The orchestrator consumes one narrow interface: a list of chat messages
//! in, either text or a structured tool-call out. Retries and provider
//! fallback are the client's own concern; from the orchestrator's view a
//! call either returns a completion or fails.

pub mod openai;

pub use openai::OpenAiCompatClient;

use serde::{Deserialize, Serialize};

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Max tokens override.
    pub max_tokens: Option<u32>,
    /// Temperature override.
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a request with messages only.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Set a max tokens override.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set a temperature override.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Result of a completion call.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Plain text response.
    Text(String),
    /// Structured tool-call request.
    ToolCall {
        /// Tool name.
        name: String,
        /// Parsed argument map.
        arguments: serde_json::Map<String, serde_json::Value>,
    },
}

/// Failure of a completion call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// Transport or provider failure.
    #[error("llm request failed: {0}")]
    Request(String),
    /// The per-call deadline elapsed.
    #[error("llm call timed out")]
    Timeout,
    /// The provider returned something unparseable.
    #[error("llm returned a malformed response: {0}")]
    Malformed(String),
}

/// Connection and model settings for an LLM client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Base URL of the API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key; `None` means unauthenticated requests.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-call deadline in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl LlmSettings {
    /// Per-call deadline as a [`std::time::Duration`].
    #[must_use]
    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.call_timeout_ms)
    }
}

/// Trait for LLM completion clients.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion call.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}
