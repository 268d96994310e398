// src/error.rs
// Standardized error types for the Trellis core

use thiserror::Error;

/// Main error type for the Trellis library.
///
/// Variants mirror the internal error taxonomy: parse failures in agent
/// output, tool failures, deadline overruns, model failures, backend store
/// failures, malformed input, and permission rejections.
#[derive(Error, Debug)]
pub enum TrellisError {
    #[error("agent output did not match the expected grammar: {0}")]
    Parse(String),

    #[error("tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    #[error("deadline exceeded for {0}")]
    Timeout(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrellisError>;

impl TrellisError {
    /// Short kind tag used in log lines and agent recovery hints.
    pub fn kind(&self) -> &'static str {
        match self {
            TrellisError::Parse(_) => "parse",
            TrellisError::Tool { .. } => "tool",
            TrellisError::Timeout(_) => "timeout",
            TrellisError::Llm(_) => "llm",
            TrellisError::Store(_) | TrellisError::Db(_) => "store",
            TrellisError::Input(_) => "input",
            TrellisError::Permission(_) => "permission",
            TrellisError::Json(_) => "input",
            TrellisError::Http(_) => "llm",
            TrellisError::Anyhow(_) => "other",
        }
    }
}

impl From<String> for TrellisError {
    fn from(s: String) -> Self {
        TrellisError::Store(s)
    }
}

impl From<TrellisError> for String {
    fn from(err: TrellisError) -> Self {
        err.to_string()
    }
}

impl From<tokio::task::JoinError> for TrellisError {
    fn from(err: tokio::task::JoinError) -> Self {
        TrellisError::Store(format!("background task failed: {err}"))
    }
}
