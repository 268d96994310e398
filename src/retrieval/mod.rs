// src/retrieval/mod.rs
// Permission-filtered vector retrieval with rerank and near-duplicate pruning

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{DeadlineConfig, VectorConfig};
use crate::embedding::{Embedder, Reranker};
use crate::error::{Result, TrellisError};
use crate::store::{DocumentRef, Permission, VectorIndex};

/// Scores closer than this are treated as the same chunk repeated.
const DEDUP_SCORE_DELTA: f32 = 0.02;

/// One retrieved passage with provenance.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub metadata: Value,
    /// First-stage vector similarity.
    pub score: f32,
    /// Cross-encoder score, present when the reranker ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl RetrievedChunk {
    /// The score ranking and pruning operate on: rerank when present, else
    /// the vector score.
    pub fn active_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.score)
    }

    pub fn document_uuid(&self) -> Option<&str> {
        self.metadata.get("document_uuid").and_then(|v| v.as_str())
    }

    pub fn filename(&self) -> &str {
        self.metadata
            .get("filename")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown source")
    }
}

/// Search knobs; defaults mirror the knowledge tool's call.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub top_k: usize,
    pub user_permission: Permission,
    pub use_reranker: bool,
    /// Cross-encoder logit cut; the -100 sentinel disables it.
    pub rerank_score_threshold: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            user_permission: Permission::Public,
            use_reranker: true,
            rerank_score_threshold: -100.0,
        }
    }
}

/// Retrieval engine over the documents collection.
pub struct Retriever {
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    docs_collection: String,
    vector_deadline: Duration,
    rerank_deadline: Duration,
}

impl Retriever {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        vector_config: &VectorConfig,
        deadlines: &DeadlineConfig,
    ) -> Self {
        info!(
            collection = %vector_config.docs_collection,
            reranker = reranker.is_some(),
            "retriever initialized"
        );
        Self {
            vector,
            embedder,
            reranker,
            docs_collection: vector_config.docs_collection.clone(),
            vector_deadline: Duration::from_secs(deadlines.vector_op),
            rerank_deadline: Duration::from_secs(deadlines.rerank),
        }
    }

    /// Ranked, permission-filtered, deduplicated passages for a query.
    /// Returns at most `top_k` results.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<RetrievedChunk>> {
        let top_k = options.top_k.max(1);
        let query_vector = self.embedder.embed_query(query).await?;

        // Over-fetch so permission filtering and dedup still leave top_k.
        let hits = timeout(
            self.vector_deadline,
            self.vector
                .search(&self.docs_collection, &query_vector, (top_k * 2) as u64),
        )
        .await
        .map_err(|_| TrellisError::Timeout("vector search".to_string()))??;

        let mut candidates: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter(|hit| {
                // Chunks without a permission field predate the field and are
                // treated as public.
                let chunk_permission = hit.meta_i64("permission").unwrap_or(0);
                if options.user_permission == Permission::Public && chunk_permission == 1 {
                    debug!(id = %hit.id, "permission filter dropped admin-only chunk");
                    return false;
                }
                true
            })
            .map(|hit| RetrievedChunk {
                id: hit.id,
                text: hit.text,
                metadata: hit.metadata,
                score: hit.score,
                rerank_score: None,
            })
            .collect();

        if options.use_reranker && !candidates.is_empty() {
            if let Some(reranker) = &self.reranker {
                let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
                let reranked = timeout(
                    self.rerank_deadline,
                    reranker.rerank(query, &texts, top_k * 2, options.rerank_score_threshold),
                )
                .await
                .map_err(|_| TrellisError::Timeout("rerank".to_string()));

                match reranked {
                    Ok(Ok(results)) => {
                        candidates = results
                            .into_iter()
                            .filter_map(|r| {
                                candidates.get(r.index).map(|c| RetrievedChunk {
                                    rerank_score: Some(r.score),
                                    ..c.clone()
                                })
                            })
                            .collect();
                    }
                    Ok(Err(e)) | Err(e) => {
                        // Rerank failure degrades to vector-score ranking.
                        warn!(error = %e, "rerank failed, falling back to vector order");
                    }
                }
            }
        }

        let kept = dedup_by_score(candidates, top_k);
        debug!(query_len = query.len(), kept = kept.len(), "retrieval complete");
        Ok(kept)
    }

    /// Concatenated context blocks for prompt assembly, cut off at
    /// `max_context_chars`.
    pub async fn get_context(
        &self,
        query: &str,
        options: SearchOptions,
        max_context_chars: usize,
    ) -> Result<String> {
        let results = self.search(query, options).await?;
        Ok(format_context(&results, max_context_chars))
    }

    /// Unique documents referenced by a result list, in rank order.
    pub fn documents_of(results: &[RetrievedChunk]) -> Vec<DocumentRef> {
        let mut seen = std::collections::HashSet::new();
        let mut documents = Vec::new();
        for chunk in results {
            if let Some(uuid) = chunk.document_uuid() {
                if !uuid.is_empty() && seen.insert(uuid.to_string()) {
                    documents.push(DocumentRef {
                        uuid: uuid.to_string(),
                        name: chunk.filename().to_string(),
                    });
                }
            }
        }
        documents
    }
}

/// Near-duplicate prune: walk the score-sorted list keeping a hit iff its
/// active score differs from every kept hit by more than the delta. Chunks
/// whose scores collapse to the same value are repeats of the same passage.
pub fn dedup_by_score(mut candidates: Vec<RetrievedChunk>, top_k: usize) -> Vec<RetrievedChunk> {
    candidates.sort_by(|a, b| b.active_score().total_cmp(&a.active_score()));

    let mut kept: Vec<RetrievedChunk> = Vec::with_capacity(top_k);
    for candidate in candidates {
        let duplicate = kept
            .iter()
            .any(|k| (candidate.active_score() - k.active_score()).abs() <= DEDUP_SCORE_DELTA);
        if !duplicate {
            kept.push(candidate);
            if kept.len() >= top_k {
                break;
            }
        }
    }
    kept
}

/// `[Doc i - filename (rerank score: X)]` blocks joined until the length cap.
pub fn format_context(results: &[RetrievedChunk], max_context_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for (i, chunk) in results.iter().enumerate() {
        let score_info = match chunk.rerank_score {
            Some(score) => format!(" (rerank score: {score:.4})"),
            None => String::new(),
        };
        let part = format!(
            "[Doc {} - {}{}]\n{}\n",
            i + 1,
            chunk.filename(),
            score_info,
            chunk.text
        );
        if current_len + part.len() > max_context_chars {
            break;
        }
        current_len += part.len();
        parts.push(part);
    }
    parts.join("\n")
}
