// src/config/bus.rs
// Message bus configuration (channel or log mode)

use serde::{Deserialize, Serialize};

/// Which bus backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusMode {
    /// In-process bounded queue with a worker pool (at-most-once).
    Channel,
    /// Partitioned durable log, Kafka-compatible (at-least-once).
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub mode: BusMode,

    // Channel mode
    pub max_size: usize,
    pub num_consumers: usize,
    pub produce_timeout_secs: u64,

    // Log mode
    pub bootstrap_servers: String,
    pub embedding_topic: String,
    pub group_id: String,

    /// Grace period for stop() to drain in-flight messages.
    pub drain_timeout_secs: u64,
}

impl BusConfig {
    pub fn from_env() -> Self {
        let mode = match super::helpers::env_or("MESSAGE_MODE", "channel").as_str() {
            "log" | "kafka" => BusMode::Log,
            _ => BusMode::Channel,
        };
        Self {
            mode,
            max_size: super::helpers::env_or_parse("BUS_MAX_SIZE", 1000),
            num_consumers: super::helpers::env_or_parse("BUS_NUM_CONSUMERS", 2),
            produce_timeout_secs: super::helpers::env_or_parse("BUS_PRODUCE_TIMEOUT_SECS", 5),
            bootstrap_servers: super::helpers::env_or("BUS_BOOTSTRAP_SERVERS", "localhost:9092"),
            embedding_topic: super::helpers::env_or("BUS_TOPIC_DOCUMENT_EMBEDDING", "document_embedding"),
            group_id: super::helpers::env_or("BUS_GROUP_ID", "trellis-ingest"),
            drain_timeout_secs: super::helpers::env_or_parse("BUS_DRAIN_TIMEOUT_SECS", 10),
        }
    }
}
