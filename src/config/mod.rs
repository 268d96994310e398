// src/config/mod.rs
// Central configuration for the Trellis core

pub mod bus;
pub mod chat;
pub mod helpers;
pub mod models;
pub mod stores;

use serde::{Deserialize, Serialize};

pub use bus::{BusConfig, BusMode};
pub use chat::{AgentConfig, AgentKind, CacheConfig, DeadlineConfig, HistoryConfig, IngestConfig};
pub use models::{EmbedderConfig, LlmConfig, RerankerConfig};
pub use stores::{DocStoreConfig, KvConfig, VectorConfig};

/// Main configuration structure - composes all domain configs.
///
/// Built once at startup and handed to the [`crate::state::AppState`]
/// container; components never read the environment themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub vector: VectorConfig,
    pub docstore: DocStoreConfig,
    pub kv: KvConfig,
    pub bus: BusConfig,
    pub embedder: EmbedderConfig,
    pub reranker: RerankerConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub cache: CacheConfig,
    pub history: HistoryConfig,
    pub ingest: IngestConfig,
    pub deadlines: DeadlineConfig,
}

impl Config {
    pub fn from_env() -> Self {
        // Don't panic if .env doesn't exist (for production)
        dotenvy::dotenv().ok();

        Self {
            vector: VectorConfig::from_env(),
            docstore: DocStoreConfig::from_env(),
            kv: KvConfig::from_env(),
            bus: BusConfig::from_env(),
            embedder: EmbedderConfig::from_env(),
            reranker: RerankerConfig::from_env(),
            llm: LlmConfig::from_env(),
            agent: AgentConfig::from_env(),
            cache: CacheConfig::from_env(),
            history: HistoryConfig::from_env(),
            ingest: IngestConfig::from_env(),
            deadlines: DeadlineConfig::from_env(),
        }
    }

    /// Validate config on startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.vector.dim == 0 {
            anyhow::bail!("VECTOR_DIM must be > 0");
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            anyhow::bail!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.ingest.chunk_overlap,
                self.ingest.chunk_size
            );
        }
        Ok(())
    }
}
