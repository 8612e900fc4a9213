//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint speaking the `/v1/chat/completions` dialect;
//! the base URL and model come from configuration.

use super::{Completion, CompletionRequest, LLMClient, LLMError, Usage};
use crate::config::LlmConfig;
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

pub struct OpenAiClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LLMClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> super::Result<Completion> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| LLMError::AuthenticationFailed("no API key configured".to_string()))?;

        let url = format!("{}/chat/completions", self.config.base_url);

        let mut api_messages = Vec::new();
        if let Some(instructions) = &request.instructions {
            api_messages.push(json!({"role": "system", "content": instructions}));
        }
        for msg in &request.messages {
            api_messages.push(json!({
                "role": msg.role.to_string(),
                "content": msg.content,
            }));
        }

        let model = request
            .model
            .as_deref()
            .unwrap_or(self.config.model.as_str());

        let mut payload = json!({
            "model": model,
            "messages": api_messages,
        });
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_output_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| LLMError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LLMError::AuthenticationFailed(text));
            } else if status.as_u16() == 429 {
                return Err(LLMError::RateLimitExceeded);
            } else {
                return Err(LLMError::InvalidRequest(text));
            }
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let latency_ms = started.elapsed().as_millis() as i64;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))?;

        let usage = data.get("usage").and_then(|u| {
            Some(Usage {
                prompt_tokens: u.get("prompt_tokens")?.as_u64()? as u32,
                completion_tokens: u.get("completion_tokens")?.as_u64()? as u32,
            })
        });

        Ok(Completion {
            text: content.to_string(),
            latency_ms,
            usage,
        })
    }
}
