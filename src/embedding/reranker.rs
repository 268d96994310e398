// src/embedding/reranker.rs
// Cross-encoder reranker client

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::RerankerConfig;
use crate::error::{Result, TrellisError};

/// One reranked passage: its index into the input slice plus the
/// cross-encoder score (a logit, may be negative).
#[derive(Debug, Clone, Deserialize)]
pub struct RerankResult {
    pub index: usize,
    pub score: f32,
}

/// Scores (query, passage) pairs with a cross-encoder and returns the
/// passages reordered by descending score. Entries below `score_threshold`
/// are dropped; pass a very negative sentinel to disable the cut.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        texts: &[String],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RerankResult>>;
}

/// HTTP reranker client (text-embeddings-inference style `/rerank`
/// endpoint).
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        texts: &[String],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RerankResult>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&json!({ "query": query, "texts": texts }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TrellisError::Timeout("rerank".to_string())
                } else {
                    TrellisError::Llm(format!("rerank request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrellisError::Llm(format!("reranker returned {status}: {body}")));
        }

        let mut results: Vec<RerankResult> = response.json().await?;
        results.retain(|r| r.index < texts.len() && r.score >= score_threshold);
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);

        debug!(candidates = texts.len(), kept = results.len(), "rerank complete");
        Ok(results)
    }
}

/// Post-process raw scores into ordered, thresholded results. Shared by the
/// HTTP client and in-process scorers.
pub fn order_scores(scores: Vec<f32>, top_k: usize, score_threshold: f32) -> Vec<RerankResult> {
    let mut results: Vec<RerankResult> = scores
        .into_iter()
        .enumerate()
        .filter(|(_, score)| *score >= score_threshold)
        .map(|(index, score)| RerankResult { index, score })
        .collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top_k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_scores_sorts_and_truncates() {
        let results = order_scores(vec![0.1, 0.9, 0.5], 2, f32::MIN);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 1);
        assert_eq!(results[1].index, 2);
    }

    #[test]
    fn order_scores_applies_threshold() {
        let results = order_scores(vec![-5.0, 2.0, -0.5], 10, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, 1);
    }

    #[test]
    fn sentinel_threshold_keeps_negative_logits() {
        let results = order_scores(vec![-5.0, -1.0], 10, -100.0);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 1);
    }
}
