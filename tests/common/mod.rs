// tests/common/mod.rs
// In-memory fakes and wiring helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use trellis::config::{
    AgentConfig, AgentKind, BusConfig, BusMode, CacheConfig, Config, DeadlineConfig,
    DocStoreConfig, EmbedderConfig, HistoryConfig, IngestConfig, KvConfig, LlmConfig,
    RerankerConfig, VectorConfig,
};
use trellis::embedding::{Embedder, RerankResult, Reranker};
use trellis::error::{Result, TrellisError};
use trellis::llm::{ChatMessage, LlmProvider, TokenStream};
use trellis::store::{Hit, VectorIndex};

pub const TEST_DIM: usize = 16;

/// Deterministic bag-of-words embedder: tokens hash into buckets, vectors
/// are unit-norm, identical text embeds identically.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self { dim: TEST_DIM }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dim;
            vector[bucket] += 1.0;
        }
        trellis::embedding::normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.encode(text))
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode(t)).collect())
    }
}

/// Reranker that preserves the incoming order with well-separated scores.
pub struct PassthroughReranker;

#[async_trait]
impl Reranker for PassthroughReranker {
    async fn rerank(
        &self,
        _query: &str,
        texts: &[String],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RerankResult>> {
        let mut results: Vec<RerankResult> = texts
            .iter()
            .enumerate()
            .map(|(index, _)| RerankResult {
                index,
                score: 100.0 - index as f32,
            })
            .filter(|r| r.score >= score_threshold)
            .collect();
        results.truncate(top_k);
        Ok(results)
    }
}

struct MemoryRow {
    id: String,
    embedding: Vec<f32>,
    text: String,
    metadata: Value,
}

/// In-memory vector index with cosine search and metadata predicates.
#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<String, Vec<MemoryRow>>>,
    next_id: Mutex<u64>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(row: &MemoryRow, field: &str, value: &str) -> bool {
        match row.metadata.get(field) {
            Some(Value::String(s)) => s == value,
            Some(other) => other.to_string() == value,
            None => false,
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn create_collection(&self, name: &str, _dim: u64) -> Result<()> {
        self.collections
            .write()
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn insert(
        &self,
        name: &str,
        embeddings: &[Vec<f32>],
        texts: &[String],
        metadatas: &[Value],
    ) -> Result<Vec<String>> {
        if embeddings.len() != texts.len() || texts.len() != metadatas.len() {
            return Err(TrellisError::Input("slice length mismatch".into()));
        }
        let mut collections = self.collections.write();
        let rows = collections.entry(name.to_string()).or_default();
        let mut ids = Vec::new();
        for ((embedding, text), metadata) in embeddings.iter().zip(texts).zip(metadatas) {
            let mut next = self.next_id.lock();
            *next += 1;
            let id = next.to_string();
            rows.push(MemoryRow {
                id: id.clone(),
                embedding: embedding.clone(),
                text: text.clone(),
                metadata: metadata.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn search(&self, name: &str, query: &[f32], k: u64) -> Result<Vec<Hit>> {
        let collections = self.collections.read();
        let Some(rows) = collections.get(name) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<Hit> = rows
            .iter()
            .map(|row| {
                let score: f32 = row
                    .embedding
                    .iter()
                    .zip(query)
                    .map(|(a, b)| a * b)
                    .sum();
                Hit {
                    id: row.id.clone(),
                    score,
                    distance: 1.0 - score,
                    text: row.text.clone(),
                    metadata: row.metadata.clone(),
                }
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k as usize);
        Ok(hits)
    }

    async fn query_by_metadata(
        &self,
        name: &str,
        field: &str,
        value: &str,
        limit: u32,
    ) -> Result<Vec<Hit>> {
        let collections = self.collections.read();
        let Some(rows) = collections.get(name) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|row| Self::matches(row, field, value))
            .take(limit as usize)
            .map(|row| Hit {
                id: row.id.clone(),
                score: 0.0,
                distance: 0.0,
                text: row.text.clone(),
                metadata: row.metadata.clone(),
            })
            .collect())
    }

    async fn delete_by_metadata(&self, name: &str, field: &str, value: &str) -> Result<()> {
        let mut collections = self.collections.write();
        if let Some(rows) = collections.get_mut(name) {
            rows.retain(|row| !Self::matches(row, field, value));
        }
        Ok(())
    }

    async fn count_by_metadata(&self, name: &str, field: &str, value: &str) -> Result<usize> {
        let collections = self.collections.read();
        Ok(collections
            .get(name)
            .map(|rows| rows.iter().filter(|r| Self::matches(r, field, value)).count())
            .unwrap_or(0))
    }
}

/// Scripted LLM: pops queued responses in order and falls back to a default
/// once the script runs out. Records every prompt it received.
pub struct ScriptedLlm {
    responses: Mutex<std::collections::VecDeque<String>>,
    default: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<&str>, default: &str) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            default: default.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, response: &str) {
        self.responses.lock().push_back(response.to_string());
    }

    fn next_response(&self, messages: &[ChatMessage]) -> String {
        let prompt = messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().push(prompt);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted-test-model"
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        Ok(self.next_response(&messages))
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<TokenStream> {
        let full = self.next_response(&messages);
        let chunks: Vec<Result<String>> = full
            .chars()
            .collect::<Vec<char>>()
            .chunks(6)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(Box::new(Box::pin(futures::stream::iter(chunks))))
    }
}

/// Test configuration: channel bus, in-memory KV, tiny vectors, low cache
/// threshold so paraphrases hit.
pub fn test_config() -> Config {
    Config {
        vector: VectorConfig {
            host: "localhost".into(),
            port: 0,
            docs_collection: "test_documents".into(),
            qa_collection: "test_qa_cache".into(),
            dim: TEST_DIM as u64,
            timeout_secs: 5,
        },
        docstore: DocStoreConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
        },
        kv: KvConfig { url: None },
        bus: BusConfig {
            mode: BusMode::Channel,
            max_size: 64,
            num_consumers: 1,
            produce_timeout_secs: 1,
            bootstrap_servers: String::new(),
            embedding_topic: String::new(),
            group_id: String::new(),
            drain_timeout_secs: 2,
        },
        embedder: EmbedderConfig {
            base_url: String::new(),
            model: "hash".into(),
            query_prefix: None,
            batch_size: 8,
            batch_timeout_secs: 5,
        },
        reranker: RerankerConfig {
            base_url: String::new(),
            model: "passthrough".into(),
            timeout_secs: 5,
        },
        llm: LlmConfig {
            base_url: String::new(),
            api_key: String::new(),
            chat_model: "scripted".into(),
            judge_model: "scripted".into(),
            timeout_secs: 5,
        },
        agent: AgentConfig {
            kind: AgentKind::React,
            max_iterations: 5,
            max_retries: 2,
        },
        cache: CacheConfig {
            enabled: true,
            similarity_threshold: 0.4,
            ttl_secs: 604_800,
        },
        history: HistoryConfig {
            summary_threshold: 20,
            max_summary_tokens: 6400,
        },
        ingest: IngestConfig {
            chunk_size: 500,
            chunk_overlap: 50,
        },
        deadlines: DeadlineConfig {
            llm: 5,
            embed_batch: 5,
            vector_op: 5,
            rerank: 5,
            tool_call: 5,
            judge: 5,
            summarizer: 5,
        },
    }
}

/// Build a fully wired AppState over the in-memory fakes.
pub async fn test_state(
    config: Config,
    chat_llm: Arc<ScriptedLlm>,
    utility_llm: Arc<ScriptedLlm>,
) -> trellis::AppState {
    let docstore = Arc::new(
        trellis::store::DocStore::connect_in_memory()
            .await
            .expect("in-memory docstore"),
    );
    let kv = Arc::new(trellis::store::Kv::in_memory());
    let vector: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new());
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new());
    let reranker: Arc<dyn Reranker> = Arc::new(PassthroughReranker);
    let extractor: Arc<dyn trellis::ingest::Extractor> =
        Arc::new(trellis::ingest::PlainTextExtractor);

    vector
        .create_collection(&config.vector.docs_collection, config.vector.dim)
        .await
        .unwrap();
    vector
        .create_collection(&config.vector.qa_collection, config.vector.dim)
        .await
        .unwrap();

    trellis::AppState::wire(
        config, docstore, kv, vector, embedder, reranker, chat_llm, utility_llm, extractor,
        None,
    )
    .expect("wire test state")
}

/// Poll until the document reaches a terminal status or the deadline
/// passes.
pub async fn wait_for_terminal(
    state: &trellis::AppState,
    document_uuid: &str,
) -> trellis::store::Document {
    for _ in 0..100 {
        let doc = state
            .docstore
            .get_document(document_uuid)
            .await
            .expect("document lookup")
            .expect("document exists");
        if doc.status.is_terminal() {
            return doc;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("document {document_uuid} never reached a terminal status");
}
