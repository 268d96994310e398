// src/embedding/mod.rs
// Query/passage embedding client

pub mod reranker;

pub use reranker::{HttpReranker, RerankResult, Reranker};

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbedderConfig;
use crate::error::{Result, TrellisError};

/// Encodes text into unit-norm vectors. Query encoding may apply an
/// instruction prefix; passages never receive it. Output dimension is fixed
/// per loaded model and must equal the collection dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch passage encoding. Vectors are L2-normalized; retrieval depends
    /// on cosine over unit vectors.
    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// HTTP embedding client (text-embeddings-inference style `/embed`
/// endpoint).
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    query_prefix: Option<String>,
    dim: usize,
    batch_size: usize,
    batch_timeout: Duration,
}

impl HttpEmbedder {
    pub fn new(config: &EmbedderConfig, dim: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            query_prefix: config.query_prefix.clone(),
            dim,
            batch_size: config.batch_size.max(1),
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
        }
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&json!({ "inputs": inputs }))
            .timeout(self.batch_timeout)
            .send();

        let response = request.await.map_err(|e| {
            if e.is_timeout() {
                TrellisError::Timeout("embedder batch".to_string())
            } else {
                TrellisError::Llm(format!("embedder request failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrellisError::Llm(format!(
                "embedder returned {status}: {body}"
            )));
        }

        let mut vectors: Vec<Vec<f32>> = response.json().await?;
        for vector in &mut vectors {
            if vector.len() != self.dim {
                return Err(TrellisError::Llm(format!(
                    "embedder returned dim {} but collection expects {}",
                    vector.len(),
                    self.dim
                )));
            }
            normalize(vector);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let input = match &self.query_prefix {
            Some(prefix) if !text.starts_with(prefix.as_str()) => format!("{prefix}{text}"),
            _ => text.to_string(),
        };
        let mut vectors = self.embed_batch(&[input]).await?;
        vectors
            .pop()
            .ok_or_else(|| TrellisError::Llm("embedder returned no vector".to_string()))
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_batch(batch).await?;
            out.extend(vectors);
        }
        debug!(passages = texts.len(), "embedded passage batch");
        Ok(out)
    }
}

/// L2-normalize in place; zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
