// src/config/chat.rs
// Agent, QA cache, history and deadline configuration

use serde::{Deserialize, Serialize};

/// Which agent implementation drives the reasoning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    React,
    Graph,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub kind: AgentKind,
    pub max_iterations: u32,
    pub max_retries: u32,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let kind = match super::helpers::env_or("AGENT_TYPE", "react").as_str() {
            "graph" => AgentKind::Graph,
            _ => AgentKind::React,
        };
        Self {
            kind,
            max_iterations: super::helpers::env_or_parse("AGENT_MAX_ITERATIONS", 5),
            max_retries: super::helpers::env_or_parse("AGENT_MAX_RETRIES", 2),
        }
    }
}

/// Similar-question answer cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Minimum cosine similarity for a cache probe hit.
    pub similarity_threshold: f32,
    /// Entry lifetime in seconds; <= 0 disables expiry.
    pub ttl_secs: i64,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: super::helpers::env_or_parse("ENABLE_QA_CACHE", true),
            similarity_threshold: super::helpers::env_or_parse("QA_SIMILARITY_THRESHOLD", 0.85),
            ttl_secs: super::helpers::env_or_parse("QA_CACHE_TTL_SECONDS", 604_800),
        }
    }
}

/// Conversation history bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Non-summary messages since the last summary that trigger compaction.
    pub summary_threshold: usize,
    /// Token ceiling for the dialog text handed to the summarizer.
    pub max_summary_tokens: usize,
}

impl HistoryConfig {
    pub fn from_env() -> Self {
        Self {
            summary_threshold: super::helpers::env_or_parse("SUMMARY_MESSAGE_THRESHOLD", 20),
            max_summary_tokens: super::helpers::env_or_parse("MAX_TOKEN", 6400),
        }
    }
}

/// Deadlines for every outbound call, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    pub llm: u64,
    pub embed_batch: u64,
    pub vector_op: u64,
    pub rerank: u64,
    pub tool_call: u64,
    pub judge: u64,
    pub summarizer: u64,
}

impl DeadlineConfig {
    pub fn from_env() -> Self {
        Self {
            llm: super::helpers::env_or_parse("DEADLINE_LLM_SECS", 30),
            embed_batch: super::helpers::env_or_parse("DEADLINE_EMBED_BATCH_SECS", 60),
            vector_op: super::helpers::env_or_parse("DEADLINE_VECTOR_SECS", 10),
            rerank: super::helpers::env_or_parse("DEADLINE_RERANK_SECS", 10),
            tool_call: super::helpers::env_or_parse("DEADLINE_TOOL_SECS", 20),
            judge: super::helpers::env_or_parse("DEADLINE_JUDGE_SECS", 5),
            summarizer: super::helpers::env_or_parse("DEADLINE_SUMMARIZER_SECS", 15),
        }
    }
}

/// Ingestion chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            chunk_size: super::helpers::env_or_parse("INGEST_CHUNK_SIZE", 500),
            chunk_overlap: super::helpers::env_or_parse("INGEST_CHUNK_OVERLAP", 50),
        }
    }
}
