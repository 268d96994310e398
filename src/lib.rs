// src/lib.rs
// Trellis: retrieval-augmented question-answering core

pub mod agent;
pub mod bus;
pub mod chat;
pub mod config;
pub mod embedding;
pub mod error;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod qa;
pub mod retrieval;
pub mod state;
pub mod store;
pub mod stream;
pub mod tools;

pub use config::Config;
pub use error::{Result, TrellisError};
pub use state::AppState;
