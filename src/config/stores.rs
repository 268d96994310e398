// src/config/stores.rs
// Vector index, document database and key/value store configuration

use serde::{Deserialize, Serialize};

/// Vector index configuration (documents + QA cache collections).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub host: String,
    pub port: u16,
    pub docs_collection: String,
    pub qa_collection: String,
    pub dim: u64,
    pub timeout_secs: u64,
}

impl VectorConfig {
    pub fn from_env() -> Self {
        Self {
            host: super::helpers::env_or("VECTOR_HOST", "localhost"),
            port: super::helpers::env_or_parse("VECTOR_PORT", 6334),
            docs_collection: super::helpers::env_or("VECTOR_COLLECTION_DOCS", "trellis_documents"),
            qa_collection: super::helpers::env_or("VECTOR_COLLECTION_QA", "trellis_qa_cache"),
            dim: super::helpers::env_or_parse("VECTOR_DIM", 1024),
            timeout_secs: super::helpers::env_or_parse("VECTOR_TIMEOUT_SECS", 10),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Document database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocStoreConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DocStoreConfig {
    pub fn from_env() -> Self {
        Self {
            url: super::helpers::env_or("DOCSTORE_URL", "sqlite://trellis.db?mode=rwc"),
            max_connections: super::helpers::env_or_parse("DOCSTORE_MAX_CONNECTIONS", 5),
        }
    }
}

/// Key/value cache configuration. When `url` is unset the in-process
/// TTL map backend is used instead of Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    pub url: Option<String>,
}

impl KvConfig {
    pub fn from_env() -> Self {
        Self {
            url: super::helpers::env_opt("KV_URL"),
        }
    }
}
