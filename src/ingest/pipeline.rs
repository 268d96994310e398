// src/ingest/pipeline.rs
// Chunk-embed-index worker consuming bus tasks

use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{Extractor, TextSplitter};
use crate::bus::{IngestTask, TaskHandler, TaskType};
use crate::config::{DeadlineConfig, IngestConfig, VectorConfig};
use crate::embedding::Embedder;
use crate::error::{Result, TrellisError};
use crate::store::{DocStatus, DocStore, VectorIndex};

/// Backoff schedule for an unavailable vector store, capped at 30 s.
const STORE_RETRY_SECS: [u64; 6] = [1, 2, 4, 8, 16, 30];

struct ProcessOutcome {
    chunks_count: usize,
    vectors_count: usize,
    embedding_secs: f64,
    processing_secs: f64,
    started_at: String,
    completed_at: String,
}

/// Ingestion worker. Consumes tasks from the bus, turns document text into
/// chunk vectors, and drives the document status machine. The handler is
/// idempotent on `document_uuid`: a redelivered task finds the chunks
/// already indexed and only re-flips the (terminal-sticky) status.
pub struct DocPipeline {
    vector: Arc<dyn VectorIndex>,
    docstore: Arc<DocStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    splitter: TextSplitter,
    docs_collection: String,
    dim: u64,
    embed_deadline: Duration,
}

impl DocPipeline {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        docstore: Arc<DocStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        ingest: &IngestConfig,
        vector_config: &VectorConfig,
        deadlines: &DeadlineConfig,
    ) -> Self {
        info!(
            chunk_size = ingest.chunk_size,
            chunk_overlap = ingest.chunk_overlap,
            "document pipeline initialized"
        );
        Self {
            vector,
            docstore,
            embedder,
            extractor,
            splitter: TextSplitter::new(ingest.chunk_size, ingest.chunk_overlap),
            docs_collection: vector_config.docs_collection.clone(),
            dim: vector_config.dim,
            embed_deadline: Duration::from_secs(deadlines.embed_batch),
        }
    }

    /// Bus handler entry point.
    pub fn handler(self: &Arc<Self>) -> TaskHandler {
        let pipeline = Arc::clone(self);
        Arc::new(move |task| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                pipeline.handle_task(task).await;
            })
        })
    }

    pub async fn handle_task(&self, task: IngestTask) {
        match task.task_type {
            TaskType::File | TaskType::Text => self.handle_embedding_task(task).await,
            TaskType::Delete => self.handle_delete_task(task).await,
            TaskType::Batch => {
                for sub_task in task.tasks {
                    Box::pin(self.handle_task(sub_task)).await;
                }
            }
        }
    }

    async fn handle_embedding_task(&self, task: IngestTask) {
        if task.document_uuid.is_empty() {
            warn!("embedding task without document_uuid discarded");
            return;
        }
        let document_uuid = task.document_uuid.clone();

        match self.process_embedding_task(task).await {
            Ok(Some(outcome)) => {
                let extra = json!({
                    "embedding_time_seconds": round2(outcome.embedding_secs),
                    "processing_time_seconds": round2(outcome.processing_secs),
                    "processing_start_time": outcome.started_at,
                    "processing_complete_time": outcome.completed_at,
                    "vectors_count": outcome.vectors_count,
                    "chunks_count": outcome.chunks_count,
                });
                if let Err(e) = self
                    .docstore
                    .set_status_if_not_terminal(
                        &document_uuid,
                        DocStatus::Done,
                        Some(outcome.chunks_count as i64),
                        Some(&extra),
                    )
                    .await
                {
                    error!(document = %document_uuid, error = %e, "failed to mark document done");
                }
                info!(
                    document = %document_uuid,
                    chunks = outcome.chunks_count,
                    vectors = outcome.vectors_count,
                    "document processed"
                );
            }
            Ok(None) => {
                // Terminal already; redelivery becomes a no-op.
                debug!(document = %document_uuid, "task skipped, document already terminal");
            }
            Err(e) => {
                error!(document = %document_uuid, error = %e, "document processing failed");
                if let Err(status_err) = self
                    .docstore
                    .set_status_if_not_terminal(&document_uuid, DocStatus::Failed, None, None)
                    .await
                {
                    error!(document = %document_uuid, error = %status_err, "failed to mark document failed");
                }
            }
        }
    }

    /// Runs the chunk-embed-index algorithm. Returns `Ok(None)` when the
    /// document is already in a terminal state.
    async fn process_embedding_task(&self, task: IngestTask) -> Result<Option<ProcessOutcome>> {
        let started = Instant::now();
        let started_at = Utc::now().to_rfc3339();
        let document_uuid = task.document_uuid.clone();

        let claimed = self
            .docstore
            .set_status_if_not_terminal(&document_uuid, DocStatus::Processing, None, None)
            .await?;
        if !claimed {
            return Ok(None);
        }

        // 1. Load text.
        let text = match task.task_type {
            TaskType::Text => task
                .content
                .clone()
                .ok_or_else(|| TrellisError::Input("text task without content".to_string()))?,
            TaskType::File => {
                let path = task
                    .file_path
                    .clone()
                    .ok_or_else(|| TrellisError::Input("file task without file_path".to_string()))?;
                if !self.extractor.supports(&path) {
                    return Err(TrellisError::Input(format!(
                        "unsupported file type: {path}"
                    )));
                }
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| TrellisError::Input(format!("cannot read {path}: {e}")))?;
                self.extractor.extract(&bytes, &path)?
            }
            _ => unreachable!("only embedding tasks reach this path"),
        };

        // 2. Split.
        let chunks = self.splitter.split_text(&text);
        if chunks.is_empty() {
            return Err(TrellisError::Input(
                "document produced no chunks after splitting".to_string(),
            ));
        }
        let chunk_count = chunks.len();
        debug!(document = %document_uuid, chunks = chunk_count, "document split");

        let collection = task
            .collection_name
            .clone()
            .unwrap_or_else(|| self.docs_collection.clone());

        // Redelivery guard: if the chunks are already indexed, skip straight
        // to the (idempotent) status flip.
        self.ensure_collection_with_retry(&collection).await?;
        let existing = self
            .vector
            .count_by_metadata(&collection, "document_uuid", &document_uuid)
            .await?;
        if existing >= chunk_count {
            info!(
                document = %document_uuid,
                existing,
                "chunks already indexed, skipping re-insert"
            );
            return Ok(Some(ProcessOutcome {
                chunks_count: chunk_count,
                vectors_count: existing,
                embedding_secs: 0.0,
                processing_secs: started.elapsed().as_secs_f64(),
                started_at,
                completed_at: Utc::now().to_rfc3339(),
            }));
        }

        // 3. Batch-embed with wall-clock accounting.
        let embed_start = Instant::now();
        let embeddings = timeout(self.embed_deadline, self.embedder.embed_passages(&chunks))
            .await
            .map_err(|_| TrellisError::Timeout("embedding batch".to_string()))??;
        let embedding_secs = embed_start.elapsed().as_secs_f64();

        let total_chars: usize = chunks.iter().map(|c| c.chars().count()).sum();
        let token_estimate = (total_chars as f64 * 0.8) as u64;
        let tokens_per_second = if embedding_secs > 0.0 {
            token_estimate as f64 / embedding_secs
        } else {
            0.0
        };
        debug!(
            document = %document_uuid,
            vectors = embeddings.len(),
            tokens = token_estimate,
            tokens_per_second = format!("{tokens_per_second:.0}"),
            "embedding batch complete"
        );

        // 4/5. Per-chunk metadata, single-batch insert, flushed before return.
        let filename = task
            .metadata
            .get("filename")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                task.file_path
                    .as_deref()
                    .and_then(|p| std::path::Path::new(p).file_name())
                    .and_then(|n| n.to_str())
                    .unwrap_or("inline text")
                    .to_string()
            });
        let source = task.file_path.clone().unwrap_or_else(|| "text_upload".to_string());

        let mut metadatas = Vec::with_capacity(chunk_count);
        for (i, _) in chunks.iter().enumerate() {
            let mut metadata = json!({
                "document_uuid": document_uuid,
                "chunk_index": i,
                "chunk_count": chunk_count,
                "filename": filename,
                "source": source,
                "permission": task.permission,
            });
            if let (Value::Object(base), Value::Object(inherited)) =
                (&mut metadata, &task.metadata)
            {
                for (k, v) in inherited {
                    base.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            metadatas.push(metadata);
        }

        let ids = self
            .vector
            .insert(&collection, &embeddings, &chunks, &metadatas)
            .await?;

        Ok(Some(ProcessOutcome {
            chunks_count: chunk_count,
            vectors_count: ids.len(),
            embedding_secs,
            processing_secs: started.elapsed().as_secs_f64(),
            started_at,
            completed_at: Utc::now().to_rfc3339(),
        }))
    }

    async fn handle_delete_task(&self, task: IngestTask) {
        if task.document_uuid.is_empty() {
            warn!("delete task without document_uuid discarded");
            return;
        }
        let document_uuid = &task.document_uuid;

        if let Err(e) = self
            .vector
            .delete_by_metadata(&self.docs_collection, "document_uuid", document_uuid)
            .await
        {
            error!(document = %document_uuid, error = %e, "vector cascade delete failed");
            return;
        }
        if let Err(e) = self.docstore.delete_document_row(document_uuid).await {
            error!(document = %document_uuid, error = %e, "document row delete failed");
            return;
        }
        // Physical file removal is best effort.
        if let Some(path) = &task.file_path {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path, error = %e, "file removal failed");
            }
        }
        info!(document = %document_uuid, "document deleted with vector cascade");
    }

    /// The store may be unavailable at startup; retry with exponential
    /// backoff capped at 30 s before failing the task.
    async fn ensure_collection_with_retry(&self, collection: &str) -> Result<()> {
        let mut last_err = None;
        for (attempt, delay) in STORE_RETRY_SECS.iter().enumerate() {
            match self.vector.create_collection(collection, self.dim).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        collection,
                        attempt = attempt + 1,
                        retry_in = delay,
                        error = %e,
                        "vector store unavailable"
                    );
                    last_err = Some(e);
                    if attempt + 1 < STORE_RETRY_SECS.len() {
                        tokio::time::sleep(Duration::from_secs(*delay)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| TrellisError::Store("vector store unavailable".to_string())))
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
