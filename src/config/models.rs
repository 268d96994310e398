// src/config/models.rs
// Embedder, reranker and LLM endpoint configuration

use serde::{Deserialize, Serialize};

/// Embedding model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub base_url: String,
    pub model: String,
    /// Instruction prefix applied to queries only, never to passages.
    pub query_prefix: Option<String>,
    pub batch_size: usize,
    pub batch_timeout_secs: u64,
}

impl EmbedderConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: super::helpers::env_or("EMBEDDER_BASE_URL", "http://localhost:8081"),
            model: super::helpers::env_or("EMBEDDER_MODEL", "bge-large-en-v1.5"),
            query_prefix: super::helpers::env_opt("EMBEDDER_QUERY_PREFIX"),
            batch_size: super::helpers::env_or_parse("EMBEDDER_BATCH_SIZE", 32),
            batch_timeout_secs: super::helpers::env_or_parse("EMBEDDER_BATCH_TIMEOUT_SECS", 60),
        }
    }
}

/// Cross-encoder reranker endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl RerankerConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: super::helpers::env_or("RERANKER_BASE_URL", "http://localhost:8082"),
            model: super::helpers::env_or("RERANKER_MODEL", "bge-reranker-v2-m3"),
            timeout_secs: super::helpers::env_or_parse("RERANKER_TIMEOUT_SECS", 10),
        }
    }
}

/// OpenAI-compatible chat model endpoint. The same provider type serves the
/// primary chat model, the QA judge and the summarizer, with different
/// model ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub judge_model: String,
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: super::helpers::env_or("LLM_BASE_URL", "https://api.deepseek.com/v1"),
            api_key: super::helpers::env_or("LLM_API_KEY", ""),
            chat_model: super::helpers::env_or("LLM_CHAT_MODEL", "deepseek-chat"),
            judge_model: super::helpers::env_or("LLM_JUDGE_MODEL", "deepseek-chat"),
            timeout_secs: super::helpers::env_or_parse("LLM_TIMEOUT_SECS", 30),
        }
    }
}
