//! LLM Client Abstraction
//!
//! The engine talks to a single chat-completion boundary. `LLMClient` is the
//! contract: one `complete` call per consultation, no streaming. System-level
//! guidance travels in `CompletionRequest::instructions`; on-the-wire roles
//! are only `user` and `assistant`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod openai;

pub use openai::OpenAiClient;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System-level instructions, folded into the provider's system slot
    pub instructions: Option<String>,

    /// Conversation history, oldest first
    pub messages: Vec<Message>,

    /// Model override (falls back to the client's configured model)
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f64>,

    /// Output token cap
    pub max_output_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Single-turn request: instructions plus one user message.
    pub fn single_turn(instructions: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            instructions: Some(instructions.into()),
            messages: vec![Message::user(user)],
            ..Default::default()
        }
    }
}

/// Token accounting reported by the provider, when available
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// One completion response
#[derive(Debug, Clone)]
pub struct Completion {
    /// Assistant text
    pub text: String,

    /// Wall-clock latency of the transport call
    pub latency_ms: i64,

    /// Provider-reported token usage
    pub usage: Option<Usage>,
}

/// Chat-completion boundary implemented by real providers and test doubles.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Provider name (e.g. "openai")
    fn name(&self) -> &str;

    /// Run one completion round-trip.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let user = Message::user("hello");
        assert_eq!(user.role, MessageRole::User);
        assert_eq!(user.content, "hello");

        let assistant = Message::assistant("hi");
        assert_eq!(assistant.role, MessageRole::Assistant);
    }

    #[test]
    fn test_role_serialization() {
        let msg = Message::user("x");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"user""#));
    }

    #[test]
    fn test_single_turn_request() {
        let req = CompletionRequest::single_turn("be terse", "top products?");
        assert_eq!(req.instructions.as_deref(), Some("be terse"));
        assert_eq!(req.messages.len(), 1);
        assert!(req.temperature.is_none());
    }
}
