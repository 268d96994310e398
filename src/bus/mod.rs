// src/bus/mod.rs
// Pluggable task queue feeding the ingestion workers

pub mod channel;
pub mod kafka;

pub use channel::ChannelBus;
pub use kafka::KafkaBus;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;

/// Ingestion task kinds carried over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    File,
    Text,
    Delete,
    Batch,
}

/// Wire shape of one ingestion task.
///
/// `permission` travels as the raw integer (0 public, 1 admin-only) so the
/// payload stays language-neutral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestTask {
    pub task_type: TaskType,
    #[serde(default)]
    pub document_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub permission: i64,
    /// Sub-tasks of a batch task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<IngestTask>,
}

impl IngestTask {
    pub fn text(document_uuid: &str, content: &str, permission: i64) -> Self {
        Self {
            task_type: TaskType::Text,
            document_uuid: document_uuid.to_string(),
            file_path: None,
            content: Some(content.to_string()),
            collection_name: None,
            metadata: Value::Object(Default::default()),
            permission,
            tasks: Vec::new(),
        }
    }

    pub fn file(document_uuid: &str, file_path: &str, permission: i64) -> Self {
        Self {
            task_type: TaskType::File,
            document_uuid: document_uuid.to_string(),
            file_path: Some(file_path.to_string()),
            content: None,
            collection_name: None,
            metadata: Value::Object(Default::default()),
            permission,
            tasks: Vec::new(),
        }
    }

    pub fn delete(document_uuid: &str) -> Self {
        Self {
            task_type: TaskType::Delete,
            document_uuid: document_uuid.to_string(),
            file_path: None,
            content: None,
            collection_name: None,
            metadata: Value::Object(Default::default()),
            permission: 0,
            tasks: Vec::new(),
        }
    }
}

/// Task handler invoked by bus consumers. Handlers own their errors; a
/// handler that panics is logged and the message is still considered acked
/// by the channel backend.
pub type TaskHandler = Arc<dyn Fn(IngestTask) -> BoxFuture<'static, ()> + Send + Sync>;

/// Queue abstraction with two delivery contracts: at-most-once for the
/// channel backend, at-least-once for the log backend. Handlers are written
/// to be idempotent on `document_uuid` either way.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Enqueue a task; blocks up to the configured produce timeout.
    async fn produce(&self, task: IngestTask) -> Result<()>;

    /// Start consumer workers dispatching to `handler`. Idempotent per bus
    /// instance; a second call is rejected.
    async fn consume(&self, handler: TaskHandler) -> Result<()>;

    /// Drain in-flight messages and stop consumers within the grace period.
    async fn stop(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_wire_shape_round_trips() {
        let task = IngestTask::text("d-1", "hello", 1);
        let raw = serde_json::to_string(&task).unwrap();
        assert!(raw.contains("\"task_type\":\"text\""));
        assert!(raw.contains("\"permission\":1"));

        let parsed: IngestTask = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.task_type, TaskType::Text);
        assert_eq!(parsed.document_uuid, "d-1");
        assert_eq!(parsed.content.as_deref(), Some("hello"));
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = r#"{"task_type": "delete", "document_uuid": "d-2"}"#;
        let parsed: IngestTask = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.task_type, TaskType::Delete);
        assert_eq!(parsed.permission, 0);
        assert!(parsed.file_path.is_none());
        assert!(parsed.tasks.is_empty());
    }
}
