// src/store/mod.rs
// Persistent store wrappers: vector index, document database, key/value cache

pub mod doc;
pub mod kv;
pub mod vector;

pub use doc::{
    ChainStep, DocStatus, DocStore, Document, DocumentRef, Permission, SendType, Session,
    StepKind, StoredMessage, ThoughtChain, User, new_message,
};
pub use kv::Kv;
pub use vector::{Hit, QdrantStore, VectorIndex};
