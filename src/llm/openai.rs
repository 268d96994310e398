// src/llm/openai.rs
// OpenAI-compatible chat completions provider (DeepSeek, vLLM, ...)

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{ChatMessage, LlmProvider, TokenStream};
use crate::config::LlmConfig;
use crate::error::{Result, TrellisError};

/// Provider for any endpoint speaking the OpenAI `chat/completions`
/// protocol.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiCompatProvider {
    pub fn new(config: &LlmConfig, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: model.to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TrellisError::Timeout("llm call".to_string())
                } else {
                    TrellisError::Llm(format!("llm request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrellisError::Llm(format!("llm returned {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
        });
        let response = self.post(&body).await?;
        let payload: Value = response.json().await?;

        payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| TrellisError::Llm("malformed completion response".to_string()))
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<TokenStream> {
        debug!(model = %self.model, messages = messages.len(), "starting llm stream");
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        let response = self.post(&body).await?;

        let byte_stream = response.bytes_stream();
        let token_stream = byte_stream.filter_map(|chunk_result| async move {
            match chunk_result {
                Ok(bytes) => {
                    let text = std::str::from_utf8(&bytes).ok()?;
                    let mut delta = String::new();
                    for line in text.lines() {
                        let line = line.trim();
                        if line.is_empty() || line.starts_with(':') {
                            continue;
                        }
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data == "[DONE]" {
                            continue;
                        }
                        if let Ok(json) = serde_json::from_str::<Value>(data) {
                            if let Some(content) =
                                json["choices"][0]["delta"]["content"].as_str()
                            {
                                delta.push_str(content);
                            }
                        }
                    }
                    if delta.is_empty() {
                        None
                    } else {
                        Some(Ok(delta))
                    }
                }
                Err(e) => Some(Err(TrellisError::Llm(format!("stream error: {e}")))),
            }
        });

        Ok(Box::new(Box::pin(token_stream)))
    }
}
