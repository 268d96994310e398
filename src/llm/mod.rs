// src/llm/mod.rs
// LLM provider seam

pub mod openai;

pub use openai::OpenAiCompatProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Simple message format for all providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Token stream returned by [`LlmProvider::stream`].
pub type TokenStream = Box<dyn futures::Stream<Item = Result<String>> + Send + Unpin>;

/// Chat model seam. One implementation serves the agent loop; separate
/// instances with cheaper model ids serve the QA judge and the summarizer.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Non-streaming completion; returns the full assistant message.
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String>;

    /// Streaming completion; yields token deltas as they arrive.
    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<TokenStream>;
}
