// src/qa/cache.rs
// Similar-question answer cache with feedback-weighted selection and eviction

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, VectorConfig};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::store::{DocStore, DocumentRef, ThoughtChain, VectorIndex};

/// Net dislikes (dislikes - likes) at which an entry is evicted and no
/// longer served.
const EVICTION_NET_DISLIKES: i64 = 3;

/// A served cache entry.
#[derive(Debug, Clone, Serialize)]
pub struct CacheHit {
    pub question: String,
    pub answer: String,
    pub thought_chain_id: String,
    pub similarity: f32,
    pub documents: Vec<DocumentRef>,
    pub like_count: i64,
    pub dislike_count: i64,
}

/// Result of a feedback update.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackOutcome {
    pub success: bool,
    pub message: String,
    pub like_count: i64,
    pub dislike_count: i64,
    pub is_cached: bool,
    pub was_cached: bool,
    pub cache_deleted: bool,
}

/// Vote kind submitted by a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Like,
    Dislike,
}

impl Feedback {
    pub fn as_str(self) -> &'static str {
        match self {
            Feedback::Like => "like",
            Feedback::Dislike => "dislike",
        }
    }
}

/// Similarity lookup over the past-questions collection. Insertion is done
/// by the trace store, and only for judge-approved answers; this type owns
/// lookup, feedback and eviction.
pub struct QaCache {
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    docstore: Arc<DocStore>,
    qa_collection: String,
    config: CacheConfig,
}

impl QaCache {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        docstore: Arc<DocStore>,
        vector_config: &VectorConfig,
        config: CacheConfig,
    ) -> Self {
        Self {
            vector,
            embedder,
            docstore,
            qa_collection: vector_config.qa_collection.clone(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Probe for a previously answered similar question. Internal failures
    /// degrade to a miss; the cache never blocks a turn.
    pub async fn find_similar(&self, question: &str, skip_cache: bool) -> Option<CacheHit> {
        if !self.is_enabled() || skip_cache {
            return None;
        }

        let query_vector = match self.embedder.embed_query(question).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "cache probe embedding failed");
                return None;
            }
        };

        let hits = match self.vector.search(&self.qa_collection, &query_vector, 5).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "cache probe search failed");
                return None;
            }
        };

        let mut best: Option<(f32, f32, String, ThoughtChain)> = None;
        for hit in hits {
            if hit.score < self.config.similarity_threshold {
                continue;
            }
            let Some(chain_id) = hit.meta_str("thought_chain_id").map(|s| s.to_string()) else {
                warn!(id = %hit.id, "cache entry without thought_chain_id");
                continue;
            };
            let chain = match self.docstore.get_thought_chain(&chain_id).await {
                Ok(Some(chain)) => chain,
                Ok(None) => {
                    warn!(chain = %chain_id, "cached chain missing, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(chain = %chain_id, error = %e, "chain load failed");
                    continue;
                }
            };
            if self.is_expired(&chain) {
                debug!(chain = %chain_id, "cache entry expired");
                continue;
            }
            if chain.dislike_count - chain.like_count >= EVICTION_NET_DISLIKES {
                continue;
            }

            // Feedback-weighted selection: similarity dominates, likes help
            // a little (capped), dislikes cost more.
            let like_weight = ((chain.like_count as f32) * 0.05).min(0.2);
            let dislike_penalty = chain.dislike_count as f32 * 0.1;
            let combined = hit.score * 0.6 + like_weight - dislike_penalty;

            let replace = match &best {
                Some((best_combined, ..)) => combined > *best_combined,
                None => true,
            };
            if replace {
                best = Some((combined, hit.score, hit.text.clone(), chain));
            }
        }

        let (_, similarity, question_text, chain) = best?;
        info!(
            chain = %chain.uuid,
            similarity = format!("{similarity:.4}"),
            likes = chain.like_count,
            "similar-question cache hit"
        );
        Some(CacheHit {
            question: question_text,
            answer: chain.answer.clone(),
            thought_chain_id: chain.uuid.clone(),
            similarity,
            documents: chain.documents_used.clone(),
            like_count: chain.like_count,
            dislike_count: chain.dislike_count,
        })
    }

    fn is_expired(&self, chain: &ThoughtChain) -> bool {
        if self.config.ttl_secs <= 0 {
            return false;
        }
        Utc::now() > chain.created_at + Duration::seconds(self.config.ttl_secs)
    }

    /// Insert a question into the cache collection. Called by the trace
    /// store once the judge approves. Returns the new vector id.
    pub async fn insert(
        &self,
        thought_chain_id: &str,
        question: &str,
        answer: &str,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<String> {
        let embedding = self.embedder.embed_query(question).await?;
        let preview: String = answer.chars().take(200).collect();
        let metadata = json!({
            "thought_chain_id": thought_chain_id,
            "session_id": session_id,
            "user_id": user_id.unwrap_or(""),
            "answer_preview": preview,
            "created_at": Utc::now().to_rfc3339(),
        });
        let ids = self
            .vector
            .insert(
                &self.qa_collection,
                &[embedding],
                &[question.to_string()],
                &[metadata],
            )
            .await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| crate::error::TrellisError::Store("cache insert returned no id".into()))
    }

    /// Evict a cached entry: the vector is deleted first, then the chain
    /// flags are cleared. If the vector delete fails the flags stay set and
    /// the next feedback attempt retries the delete.
    pub async fn delete_cache(&self, thought_chain_id: &str) -> Result<bool> {
        self.vector
            .delete_by_metadata(&self.qa_collection, "thought_chain_id", thought_chain_id)
            .await?;
        self.docstore
            .set_chain_cache_state(thought_chain_id, None)
            .await?;
        info!(chain = %thought_chain_id, "qa cache entry evicted");
        Ok(true)
    }

    /// Apply one user's like/dislike vote.
    ///
    /// Duplicate identical votes are rejected; an opposite vote first undoes
    /// the old one. Counters always agree with the per-user vote map because
    /// both are written in the same update.
    pub async fn update_feedback(
        &self,
        thought_chain_id: &str,
        user_id: &str,
        feedback: Feedback,
    ) -> Result<FeedbackOutcome> {
        let Some(mut chain) = self.docstore.get_thought_chain(thought_chain_id).await? else {
            return Ok(FeedbackOutcome {
                success: false,
                message: "thought chain not found".to_string(),
                like_count: 0,
                dislike_count: 0,
                is_cached: false,
                was_cached: false,
                cache_deleted: false,
            });
        };

        let previous = chain.user_feedbacks.get(user_id).cloned();
        if previous.as_deref() == Some(feedback.as_str()) {
            return Ok(FeedbackOutcome {
                success: false,
                message: "duplicate feedback".to_string(),
                like_count: chain.like_count,
                dislike_count: chain.dislike_count,
                is_cached: chain.is_cached,
                was_cached: chain.is_cached,
                cache_deleted: false,
            });
        }

        // Switching votes undoes the previous one first.
        match previous.as_deref() {
            Some("like") => chain.like_count = (chain.like_count - 1).max(0),
            Some("dislike") => chain.dislike_count = (chain.dislike_count - 1).max(0),
            _ => {}
        }
        match feedback {
            Feedback::Like => chain.like_count += 1,
            Feedback::Dislike => chain.dislike_count += 1,
        }
        chain
            .user_feedbacks
            .insert(user_id.to_string(), feedback.as_str().to_string());

        let was_cached = chain.is_cached;
        let mut cache_deleted = false;
        let net_dislikes = chain.dislike_count - chain.like_count;
        if net_dislikes >= EVICTION_NET_DISLIKES && chain.is_cached {
            match self
                .vector
                .delete_by_metadata(&self.qa_collection, "thought_chain_id", &chain.uuid)
                .await
            {
                Ok(()) => {
                    chain.is_cached = false;
                    chain.qa_vector_id = None;
                    cache_deleted = true;
                    info!(chain = %chain.uuid, net_dislikes, "net dislikes reached threshold, cache evicted");
                }
                Err(e) => {
                    // Flags stay set; the repair happens on the next attempt.
                    warn!(chain = %chain.uuid, error = %e, "cache eviction failed, will retry");
                }
            }
        }

        self.docstore.update_chain_feedback(&chain).await?;

        Ok(FeedbackOutcome {
            success: true,
            message: String::new(),
            like_count: chain.like_count,
            dislike_count: chain.dislike_count,
            is_cached: chain.is_cached,
            was_cached,
            cache_deleted,
        })
    }
}
