// src/store/doc.rs
// Document database wrapper: documents, sessions, messages, thought chains, users

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DocStoreConfig;
use crate::error::Result;

/// Document processing status. Moves monotonically
/// PENDING -> PROCESSING -> {DONE, FAILED}; only an operator reset goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum DocStatus {
    Pending = 0,
    Processing = 1,
    Done = 2,
    Failed = 3,
}

impl DocStatus {
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => DocStatus::Processing,
            2 => DocStatus::Done,
            3 => DocStatus::Failed,
            _ => DocStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocStatus::Done | DocStatus::Failed)
    }
}

/// Document visibility. Missing metadata on old chunks is treated as Public
/// at retrieval time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum Permission {
    Public = 0,
    AdminOnly = 1,
}

impl Permission {
    pub fn from_i64(v: i64) -> Self {
        if v == 1 { Permission::AdminOnly } else { Permission::Public }
    }
}

/// Message sender kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum SendType {
    User = 0,
    Ai = 1,
    Summary = 2,
}

impl SendType {
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => SendType::Ai,
            2 => SendType::Summary,
            _ => SendType::User,
        }
    }
}

/// An uploaded artifact.
#[derive(Debug, Clone)]
pub struct Document {
    pub uuid: String,
    pub name: String,
    pub content: String,
    pub page_count: i64,
    pub url: String,
    pub size_bytes: i64,
    pub permission: Permission,
    pub status: DocStatus,
    pub extra: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A conversation container.
#[derive(Debug, Clone)]
pub struct Session {
    pub uuid: String,
    pub user_id: String,
    pub name: String,
    pub last_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single turn entry.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uuid: String,
    pub session_id: String,
    pub content: String,
    pub send_type: SendType,
    pub send_id: String,
    pub send_name: String,
    pub send_avatar: String,
    pub receive_id: String,
    pub file_type: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<String>,
    pub extra: Value,
    pub status: i64,
    pub created_at: DateTime<Utc>,
    pub send_at: Option<DateTime<Utc>>,
}

/// Reasoning trace step kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Thought,
    Action,
    Observation,
}

/// A single step in the reasoning trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub step: u32,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub content: String,
}

/// Minimal document provenance attached to answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub uuid: String,
    pub name: String,
}

/// The full reasoning trace for one agent run.
#[derive(Debug, Clone)]
pub struct ThoughtChain {
    pub uuid: String,
    pub session_id: String,
    pub message_id: Option<String>,
    pub question: String,
    pub answer: String,
    pub steps: Vec<ChainStep>,
    pub documents_used: Vec<DocumentRef>,
    pub user_id: Option<String>,
    pub model_name: Option<String>,
    pub total_steps: i64,
    pub like_count: i64,
    pub dislike_count: i64,
    pub is_cached: bool,
    pub qa_vector_id: Option<String>,
    pub user_feedbacks: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub uuid: String,
    pub nickname: String,
    pub is_admin: bool,
}

type MessageRow = (
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    i64,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

type ChainRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
    i64,
    i64,
    Option<String>,
    String,
    DateTime<Utc>,
);

/// Typed wrapper over the document database. Owns the lifecycles of
/// documents, sessions, messages, thought chains and users.
pub struct DocStore {
    pool: SqlitePool,
}

impl DocStore {
    pub async fn connect(config: &DocStoreConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store, used by tests and the channel-mode demo setup.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect(&DocStoreConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
    }

    async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                page_count INTEGER NOT NULL DEFAULT 0,
                url TEXT NOT NULL DEFAULT '',
                size_bytes INTEGER NOT NULL DEFAULT 0,
                permission INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 0,
                extra TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                last_message TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                content TEXT NOT NULL,
                send_type INTEGER NOT NULL,
                send_id TEXT NOT NULL,
                send_name TEXT NOT NULL DEFAULT '',
                send_avatar TEXT NOT NULL DEFAULT '',
                receive_id TEXT NOT NULL DEFAULT '',
                file_type TEXT,
                file_name TEXT,
                file_size TEXT,
                extra TEXT NOT NULL DEFAULT '{}',
                status INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                send_at TEXT
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at)",
            r#"CREATE TABLE IF NOT EXISTS thought_chains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                message_id TEXT,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                steps TEXT NOT NULL DEFAULT '[]',
                documents_used TEXT NOT NULL DEFAULT '[]',
                user_id TEXT,
                model_name TEXT,
                total_steps INTEGER NOT NULL DEFAULT 0,
                like_count INTEGER NOT NULL DEFAULT 0,
                dislike_count INTEGER NOT NULL DEFAULT 0,
                is_cached INTEGER NOT NULL DEFAULT 0,
                qa_vector_id TEXT,
                user_feedbacks TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_chains_session ON thought_chains(session_id, created_at)",
            r#"CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                nickname TEXT NOT NULL DEFAULT '',
                is_admin INTEGER NOT NULL DEFAULT 0
            )"#,
        ];
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ==================== documents ====================

    pub async fn insert_document(
        &self,
        name: &str,
        url: &str,
        size_bytes: i64,
        permission: Permission,
    ) -> Result<Document> {
        let now = Utc::now();
        let doc = Document {
            uuid: Uuid::new_v4().to_string(),
            name: name.to_string(),
            content: String::new(),
            page_count: 0,
            url: url.to_string(),
            size_bytes,
            permission,
            status: DocStatus::Pending,
            extra: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"INSERT INTO documents
               (uuid, name, content, page_count, url, size_bytes, permission, status, extra, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&doc.uuid)
        .bind(&doc.name)
        .bind(&doc.content)
        .bind(doc.page_count)
        .bind(&doc.url)
        .bind(doc.size_bytes)
        .bind(doc.permission as i64)
        .bind(doc.status as i64)
        .bind(doc.extra.to_string())
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(doc)
    }

    pub async fn get_document(&self, uuid: &str) -> Result<Option<Document>> {
        let row: Option<(String, String, String, i64, String, i64, i64, i64, String, DateTime<Utc>, DateTime<Utc>)> =
            sqlx::query_as(
                r#"SELECT uuid, name, content, page_count, url, size_bytes, permission, status, extra, created_at, updated_at
                   FROM documents WHERE uuid = ?"#,
            )
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Document {
            uuid: r.0,
            name: r.1,
            content: r.2,
            page_count: r.3,
            url: r.4,
            size_bytes: r.5,
            permission: Permission::from_i64(r.6),
            status: DocStatus::from_i64(r.7),
            extra: serde_json::from_str(&r.8).unwrap_or(Value::Null),
            created_at: r.9,
            updated_at: r.10,
        }))
    }

    /// Idempotent status flip. Terminal states (DONE, FAILED) are never
    /// overwritten; redeliveries that re-run a finished task become no-ops.
    /// Returns whether a row was updated.
    pub async fn set_status_if_not_terminal(
        &self,
        uuid: &str,
        status: DocStatus,
        page_count: Option<i64>,
        extra_update: Option<&Value>,
    ) -> Result<bool> {
        let merged_extra = match extra_update {
            Some(update) => {
                let current = self
                    .get_document(uuid)
                    .await?
                    .map(|d| d.extra)
                    .unwrap_or(Value::Null);
                let mut base = match current {
                    Value::Object(map) => map,
                    _ => Default::default(),
                };
                if let Value::Object(patch) = update {
                    for (k, v) in patch {
                        base.insert(k.clone(), v.clone());
                    }
                }
                Some(Value::Object(base).to_string())
            }
            None => None,
        };

        let result = sqlx::query(
            r#"UPDATE documents
               SET status = ?,
                   page_count = COALESCE(?, page_count),
                   extra = COALESCE(?, extra),
                   updated_at = ?
               WHERE uuid = ? AND status NOT IN (2, 3)"#,
        )
        .bind(status as i64)
        .bind(page_count)
        .bind(merged_extra)
        .bind(Utc::now())
        .bind(uuid)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if !updated {
            debug!(document = uuid, ?status, "status flip skipped, already terminal");
        }
        Ok(updated)
    }

    /// Operator tool: make a stuck PROCESSING document re-enqueueable.
    pub async fn reset_to_pending(&self, uuid: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = 0, updated_at = ? WHERE uuid = ?",
        )
        .bind(Utc::now())
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_document_row(&self, uuid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== sessions ====================

    pub async fn create_session(
        &self,
        user_id: &str,
        name: &str,
        last_message: &str,
    ) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            uuid: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            last_message: last_message.to_string(),
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"INSERT INTO sessions (uuid, user_id, name, last_message, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&session.uuid)
        .bind(&session.user_id)
        .bind(&session.name)
        .bind(&session.last_message)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn get_session(&self, uuid: &str) -> Result<Option<Session>> {
        let row: Option<(String, String, String, String, DateTime<Utc>, DateTime<Utc>)> =
            sqlx::query_as(
                r#"SELECT uuid, user_id, name, last_message, created_at, updated_at
                   FROM sessions WHERE uuid = ?"#,
            )
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Session {
            uuid: r.0,
            user_id: r.1,
            name: r.2,
            last_message: r.3,
            created_at: r.4,
            updated_at: r.5,
        }))
    }

    /// Last-write-wins; a slight race with the background auto-namer is
    /// acceptable.
    pub async fn update_session_last_message(&self, uuid: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_message = ?, updated_at = ? WHERE uuid = ?")
            .bind(message)
            .bind(Utc::now())
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_session_name(&self, uuid: &str, name: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET name = ?, updated_at = ? WHERE uuid = ?")
            .bind(name)
            .bind(Utc::now())
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== messages ====================

    pub async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO messages
               (uuid, session_id, content, send_type, send_id, send_name, send_avatar,
                receive_id, file_type, file_name, file_size, extra, status, created_at, send_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&message.uuid)
        .bind(&message.session_id)
        .bind(&message.content)
        .bind(message.send_type as i64)
        .bind(&message.send_id)
        .bind(&message.send_name)
        .bind(&message.send_avatar)
        .bind(&message.receive_id)
        .bind(&message.file_type)
        .bind(&message.file_name)
        .bind(&message.file_size)
        .bind(message.extra.to_string())
        .bind(message.status)
        .bind(message.created_at)
        .bind(message.send_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_message(r: MessageRow) -> StoredMessage {
        StoredMessage {
            uuid: r.0,
            session_id: r.1,
            content: r.2,
            send_type: SendType::from_i64(r.3),
            send_id: r.4,
            send_name: r.5,
            send_avatar: r.6,
            receive_id: r.7,
            file_type: r.8,
            file_name: r.9,
            file_size: r.10,
            extra: serde_json::from_str(&r.11).unwrap_or(Value::Null),
            status: r.12,
            created_at: r.13,
            send_at: r.14,
        }
    }

    const MESSAGE_COLUMNS: &'static str = "uuid, session_id, content, send_type, send_id, send_name, send_avatar, receive_id, file_type, file_name, file_size, extra, status, created_at, send_at";

    /// All messages of a session in chronological order, paginated.
    /// Returns `(total, page_of_messages)`.
    pub async fn get_session_messages(
        &self,
        session_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(i64, Vec<StoredMessage>)> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;

        let offset = (page.max(1) - 1) as i64 * page_size as i64;
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE session_id = ? ORDER BY created_at, id LIMIT ? OFFSET ?",
            Self::MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((total.0, rows.into_iter().map(Self::row_to_message).collect()))
    }

    /// The most recent SUMMARY message of a session, if any.
    pub async fn latest_summary(&self, session_id: &str) -> Result<Option<StoredMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE session_id = ? AND send_type = 2 ORDER BY created_at DESC, id DESC LIMIT 1",
            Self::MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Self::row_to_message))
    }

    /// Non-summary messages strictly after a point in time, chronological.
    pub async fn messages_after(
        &self,
        session_id: &str,
        after: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE session_id = ? AND created_at > ? AND send_type != 2 ORDER BY created_at, id",
            Self::MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(after)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::row_to_message).collect())
    }

    /// All non-summary messages of a session, chronological.
    pub async fn non_summary_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE session_id = ? AND send_type != 2 ORDER BY created_at, id",
            Self::MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::row_to_message).collect())
    }

    pub async fn count_non_summary_messages(&self, session_id: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE session_id = ? AND send_type != 2",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    pub async fn count_non_summary_after(
        &self,
        session_id: &str,
        after: DateTime<Utc>,
    ) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE session_id = ? AND created_at > ? AND send_type != 2",
        )
        .bind(session_id)
        .bind(after)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Merge fields into a message's `extra` object (used to back-reference
    /// the thought chain from the AI message).
    pub async fn update_message_extra(&self, uuid: &str, patch: &Value) -> Result<()> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT extra FROM messages WHERE uuid = ?")
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        let Some((raw,)) = row else {
            warn!(message = uuid, "extra update skipped, message missing");
            return Ok(());
        };
        let mut base = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => Default::default(),
        };
        if let Value::Object(fields) = patch {
            for (k, v) in fields {
                base.insert(k.clone(), v.clone());
            }
        }
        sqlx::query("UPDATE messages SET extra = ? WHERE uuid = ?")
            .bind(Value::Object(base).to_string())
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== thought chains ====================

    pub async fn insert_thought_chain(&self, chain: &ThoughtChain) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO thought_chains
               (uuid, session_id, message_id, question, answer, steps, documents_used,
                user_id, model_name, total_steps, like_count, dislike_count,
                is_cached, qa_vector_id, user_feedbacks, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&chain.uuid)
        .bind(&chain.session_id)
        .bind(&chain.message_id)
        .bind(&chain.question)
        .bind(&chain.answer)
        .bind(serde_json::to_string(&chain.steps)?)
        .bind(serde_json::to_string(&chain.documents_used)?)
        .bind(&chain.user_id)
        .bind(&chain.model_name)
        .bind(chain.total_steps)
        .bind(chain.like_count)
        .bind(chain.dislike_count)
        .bind(chain.is_cached as i64)
        .bind(&chain.qa_vector_id)
        .bind(serde_json::to_string(&chain.user_feedbacks)?)
        .bind(chain.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_chain(r: ChainRow) -> ThoughtChain {
        ThoughtChain {
            uuid: r.0,
            session_id: r.1,
            message_id: r.2,
            question: r.3,
            answer: r.4,
            steps: serde_json::from_str(&r.5).unwrap_or_default(),
            documents_used: serde_json::from_str(&r.6).unwrap_or_default(),
            user_id: r.7,
            model_name: r.8,
            total_steps: r.9,
            like_count: r.10,
            dislike_count: r.11,
            is_cached: r.12 != 0,
            qa_vector_id: r.13,
            user_feedbacks: serde_json::from_str(&r.14).unwrap_or_default(),
            created_at: r.15,
        }
    }

    const CHAIN_COLUMNS: &'static str = "uuid, session_id, message_id, question, answer, steps, documents_used, user_id, model_name, total_steps, like_count, dislike_count, is_cached, qa_vector_id, user_feedbacks, created_at";

    pub async fn get_thought_chain(&self, uuid: &str) -> Result<Option<ThoughtChain>> {
        let row: Option<ChainRow> = sqlx::query_as(&format!(
            "SELECT {} FROM thought_chains WHERE uuid = ?",
            Self::CHAIN_COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Self::row_to_chain))
    }

    pub async fn find_chain_by_message(&self, message_id: &str) -> Result<Option<ThoughtChain>> {
        let row: Option<ChainRow> = sqlx::query_as(&format!(
            "SELECT {} FROM thought_chains WHERE message_id = ?",
            Self::CHAIN_COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Self::row_to_chain))
    }

    pub async fn chains_by_session(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<ThoughtChain>> {
        let rows: Vec<ChainRow> = sqlx::query_as(&format!(
            "SELECT {} FROM thought_chains WHERE session_id = ? ORDER BY created_at DESC LIMIT ?",
            Self::CHAIN_COLUMNS
        ))
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::row_to_chain).collect())
    }

    /// Write back feedback counters, the per-user vote map and the cache
    /// flags in one statement; the row-level write keeps counters consistent
    /// with the vote map.
    pub async fn update_chain_feedback(&self, chain: &ThoughtChain) -> Result<()> {
        sqlx::query(
            r#"UPDATE thought_chains
               SET like_count = ?, dislike_count = ?, user_feedbacks = ?,
                   is_cached = ?, qa_vector_id = ?
               WHERE uuid = ?"#,
        )
        .bind(chain.like_count)
        .bind(chain.dislike_count)
        .bind(serde_json::to_string(&chain.user_feedbacks)?)
        .bind(chain.is_cached as i64)
        .bind(&chain.qa_vector_id)
        .bind(&chain.uuid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `is_cached == true` iff `qa_vector_id` is set; both are written
    /// together so the invariant cannot be observed half-applied.
    pub async fn set_chain_cache_state(
        &self,
        uuid: &str,
        qa_vector_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE thought_chains SET is_cached = ?, qa_vector_id = ? WHERE uuid = ?",
        )
        .bind(qa_vector_id.is_some() as i64)
        .bind(qa_vector_id)
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== users ====================

    pub async fn get_user(&self, uuid: &str) -> Result<Option<User>> {
        let row: Option<(String, String, i64)> =
            sqlx::query_as("SELECT uuid, nickname, is_admin FROM users WHERE uuid = ?")
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| User {
            uuid: r.0,
            nickname: r.1,
            is_admin: r.2 != 0,
        }))
    }

    pub async fn insert_user(&self, uuid: &str, nickname: &str, is_admin: bool) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO users (uuid, nickname, is_admin) VALUES (?, ?, ?)")
            .bind(uuid)
            .bind(nickname)
            .bind(is_admin as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// User permission used by retrieval and tool filtering: admins see
    /// admin-only documents, everyone else is public-scoped.
    pub async fn user_permission(&self, user_id: &str) -> Result<Permission> {
        let user = self.get_user(user_id).await?;
        Ok(match user {
            Some(u) if u.is_admin => Permission::AdminOnly,
            _ => Permission::Public,
        })
    }
}

/// Builder for message rows; fills the bookkeeping fields the callers never
/// vary.
pub fn new_message(
    session_id: &str,
    content: &str,
    send_type: SendType,
    send_id: &str,
    receive_id: &str,
) -> StoredMessage {
    StoredMessage {
        uuid: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        content: content.to_string(),
        send_type,
        send_id: send_id.to_string(),
        send_name: String::new(),
        send_avatar: String::new(),
        receive_id: receive_id.to_string(),
        file_type: None,
        file_name: None,
        file_size: None,
        extra: Value::Object(Default::default()),
        status: 1,
        created_at: Utc::now(),
        send_at: Some(Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn document_status_is_monotone() {
        let store = DocStore::connect_in_memory().await.unwrap();
        let doc = store
            .insert_document("spec.pdf", "/files/spec.pdf", 1024, Permission::Public)
            .await
            .unwrap();
        assert_eq!(doc.status, DocStatus::Pending);

        assert!(store
            .set_status_if_not_terminal(&doc.uuid, DocStatus::Processing, None, None)
            .await
            .unwrap());
        assert!(store
            .set_status_if_not_terminal(
                &doc.uuid,
                DocStatus::Done,
                Some(4),
                Some(&json!({"chunks_count": 4})),
            )
            .await
            .unwrap());

        // A redelivered task cannot move the document out of DONE.
        assert!(!store
            .set_status_if_not_terminal(&doc.uuid, DocStatus::Failed, None, None)
            .await
            .unwrap());

        let stored = store.get_document(&doc.uuid).await.unwrap().unwrap();
        assert_eq!(stored.status, DocStatus::Done);
        assert_eq!(stored.page_count, 4);
        assert_eq!(stored.extra["chunks_count"], 4);

        // Operator reset re-opens the lifecycle.
        assert!(store.reset_to_pending(&doc.uuid).await.unwrap());
        let stored = store.get_document(&doc.uuid).await.unwrap().unwrap();
        assert_eq!(stored.status, DocStatus::Pending);
    }

    #[tokio::test]
    async fn messages_are_ordered_and_paginated() {
        let store = DocStore::connect_in_memory().await.unwrap();
        let session = store.create_session("u-1", "test", "").await.unwrap();

        for i in 0..5 {
            let msg = new_message(
                &session.uuid,
                &format!("message {i}"),
                if i % 2 == 0 { SendType::User } else { SendType::Ai },
                "u-1",
                "system",
            );
            store.insert_message(&msg).await.unwrap();
        }

        let (total, page) = store.get_session_messages(&session.uuid, 1, 3).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].content, "message 0");

        let (_, page2) = store.get_session_messages(&session.uuid, 2, 3).await.unwrap();
        assert_eq!(page2.len(), 2);
        assert_eq!(page2[1].content, "message 4");
    }

    #[tokio::test]
    async fn summary_partitions_the_history() {
        let store = DocStore::connect_in_memory().await.unwrap();
        let session = store.create_session("u-1", "test", "").await.unwrap();

        for i in 0..4 {
            let msg = new_message(&session.uuid, &format!("m{i}"), SendType::User, "u-1", "system");
            store.insert_message(&msg).await.unwrap();
        }
        let summary = new_message(&session.uuid, "summary text", SendType::Summary, "system", "system");
        store.insert_message(&summary).await.unwrap();
        let late = new_message(&session.uuid, "after", SendType::Ai, "system", "u-1");
        store.insert_message(&late).await.unwrap();

        let found = store.latest_summary(&session.uuid).await.unwrap().unwrap();
        assert_eq!(found.content, "summary text");

        let after = store.messages_after(&session.uuid, found.created_at).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].content, "after");
        assert_eq!(
            store.count_non_summary_after(&session.uuid, found.created_at).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn chain_cache_state_stays_consistent() {
        let store = DocStore::connect_in_memory().await.unwrap();
        let chain = ThoughtChain {
            uuid: "c-1".into(),
            session_id: "s-1".into(),
            message_id: Some("m-1".into()),
            question: "What is RAG?".into(),
            answer: "Retrieval-augmented generation.".into(),
            steps: vec![],
            documents_used: vec![],
            user_id: Some("u-1".into()),
            model_name: None,
            total_steps: 0,
            like_count: 0,
            dislike_count: 0,
            is_cached: false,
            qa_vector_id: None,
            user_feedbacks: Default::default(),
            created_at: Utc::now(),
        };
        store.insert_thought_chain(&chain).await.unwrap();

        store.set_chain_cache_state("c-1", Some("vec-9")).await.unwrap();
        let cached = store.get_thought_chain("c-1").await.unwrap().unwrap();
        assert!(cached.is_cached);
        assert_eq!(cached.qa_vector_id.as_deref(), Some("vec-9"));

        store.set_chain_cache_state("c-1", None).await.unwrap();
        let cleared = store.get_thought_chain("c-1").await.unwrap().unwrap();
        assert!(!cleared.is_cached);
        assert!(cleared.qa_vector_id.is_none());
    }
}
