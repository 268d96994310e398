// src/state.rs
// Application container: owns every component and their lifecycles

use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::{ChannelBus, IngestTask, KafkaBus, MessageBus};
use crate::chat::{ImageAnalyzer, MsgOrchestrator, ReplyPipeline};
use crate::config::{BusMode, Config};
use crate::embedding::{Embedder, HttpEmbedder, HttpReranker, Reranker};
use crate::error::Result;
use crate::history::HistoryMgr;
use crate::ingest::{DocPipeline, Extractor, PlainTextExtractor};
use crate::llm::{LlmProvider, OpenAiCompatProvider};
use crate::qa::{QaCache, QaJudge, TraceStore};
use crate::retrieval::Retriever;
use crate::store::{DocStore, Document, Kv, Permission, QdrantStore, VectorIndex};

/// Explicit component container, built once at startup. Components receive
/// their collaborators through constructors; shutdown runs in reverse of
/// construction order.
pub struct AppState {
    pub config: Config,
    pub docstore: Arc<DocStore>,
    pub kv: Arc<Kv>,
    pub vector: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Arc<dyn Reranker>,
    pub chat_llm: Arc<dyn LlmProvider>,
    pub utility_llm: Arc<dyn LlmProvider>,
    pub bus: Arc<dyn MessageBus>,
    pub pipeline: Arc<DocPipeline>,
    pub retriever: Arc<Retriever>,
    pub cache: Arc<QaCache>,
    pub judge: Arc<QaJudge>,
    pub trace: Arc<TraceStore>,
    pub history: Arc<HistoryMgr>,
    pub orchestrator: Arc<MsgOrchestrator>,
}

impl AppState {
    /// Build the full component graph, leaves first.
    pub async fn init(config: Config) -> Result<Self> {
        config.validate()?;

        let docstore = Arc::new(DocStore::connect(&config.docstore).await?);
        let kv = Arc::new(Kv::connect(&config.kv).await?);
        let vector: Arc<dyn VectorIndex> =
            Arc::new(QdrantStore::connect(&config.vector.url())?);

        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            &config.embedder,
            config.vector.dim as usize,
        ));
        let reranker: Arc<dyn Reranker> = Arc::new(HttpReranker::new(&config.reranker));

        let chat_llm: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new(
            &config.llm,
            &config.llm.chat_model,
        ));
        let utility_llm: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new(
            &config.llm,
            &config.llm.judge_model,
        ));

        let extractor: Arc<dyn Extractor> = Arc::new(PlainTextExtractor);

        let state = Self::wire(
            config, docstore, kv, vector, embedder, reranker, chat_llm, utility_llm, extractor,
            None,
        )?;

        // The vector store may still be warming up; the pipeline retries on
        // demand, so a failure here only costs a log line.
        for (collection, dim) in [
            (&state.config.vector.docs_collection, state.config.vector.dim),
            (&state.config.vector.qa_collection, state.config.vector.dim),
        ] {
            if let Err(e) = state.vector.create_collection(collection, dim).await {
                warn!(collection = %collection, error = %e, "collection bootstrap deferred");
            }
        }

        info!("application state initialized");
        Ok(state)
    }

    /// Wire the component graph from already-built leaves. Tests inject
    /// in-memory stores and scripted models here.
    #[allow(clippy::too_many_arguments)]
    pub fn wire(
        config: Config,
        docstore: Arc<DocStore>,
        kv: Arc<Kv>,
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        chat_llm: Arc<dyn LlmProvider>,
        utility_llm: Arc<dyn LlmProvider>,
        extractor: Arc<dyn Extractor>,
        image_analyzer: Option<Arc<dyn ImageAnalyzer>>,
    ) -> Result<Self> {
        let bus: Arc<dyn MessageBus> = match config.bus.mode {
            BusMode::Channel => Arc::new(ChannelBus::new(&config.bus)),
            BusMode::Log => Arc::new(KafkaBus::new(&config.bus)?),
        };

        let pipeline = Arc::new(DocPipeline::new(
            Arc::clone(&vector),
            Arc::clone(&docstore),
            Arc::clone(&embedder),
            extractor,
            &config.ingest,
            &config.vector,
            &config.deadlines,
        ));

        let retriever = Arc::new(Retriever::new(
            Arc::clone(&vector),
            Arc::clone(&embedder),
            Some(Arc::clone(&reranker)),
            &config.vector,
            &config.deadlines,
        ));

        let cache = Arc::new(QaCache::new(
            Arc::clone(&vector),
            Arc::clone(&embedder),
            Arc::clone(&docstore),
            &config.vector,
            config.cache.clone(),
        ));
        let judge = Arc::new(QaJudge::new(
            Arc::clone(&utility_llm),
            config.cache.enabled,
            config.deadlines.judge,
        ));
        let trace = Arc::new(TraceStore::new(Arc::clone(&docstore), Arc::clone(&cache)));
        let history = Arc::new(HistoryMgr::new(
            Arc::clone(&docstore),
            Arc::clone(&utility_llm),
            config.history.clone(),
            config.deadlines.summarizer,
        ));

        let reply = Arc::new(ReplyPipeline::new(
            Arc::clone(&chat_llm),
            Arc::clone(&retriever),
            Arc::clone(&cache),
            config.agent.clone(),
            config.deadlines.clone(),
        ));
        let orchestrator = Arc::new(MsgOrchestrator::new(
            Arc::clone(&docstore),
            Arc::clone(&kv),
            Arc::clone(&history),
            Arc::clone(&judge),
            Arc::clone(&trace),
            Arc::clone(&cache),
            Arc::clone(&reply),
            image_analyzer,
            chat_llm.model().to_string(),
        ));

        Ok(Self {
            config,
            docstore,
            kv,
            vector,
            embedder,
            reranker,
            chat_llm,
            utility_llm,
            bus,
            pipeline,
            retriever,
            cache,
            judge,
            trace,
            history,
            orchestrator,
        })
    }

    /// Start the ingestion consumers.
    pub async fn start_ingestion(&self) -> Result<()> {
        self.bus.consume(self.pipeline.handler()).await
    }

    /// Upload inline text: PENDING document row plus a bus task.
    pub async fn upload_text(
        &self,
        name: &str,
        content: &str,
        permission: Permission,
    ) -> Result<Document> {
        let doc = self
            .docstore
            .insert_document(name, "", content.len() as i64, permission)
            .await?;
        let mut task = IngestTask::text(&doc.uuid, content, permission as i64);
        task.metadata = serde_json::json!({ "filename": name });
        self.bus.produce(task).await?;
        info!(document = %doc.uuid, name = %name, "text upload enqueued");
        Ok(doc)
    }

    /// Upload a file already on disk.
    pub async fn upload_file(
        &self,
        name: &str,
        path: &str,
        size_bytes: i64,
        permission: Permission,
    ) -> Result<Document> {
        let doc = self
            .docstore
            .insert_document(name, path, size_bytes, permission)
            .await?;
        let mut task = IngestTask::file(&doc.uuid, path, permission as i64);
        task.metadata = serde_json::json!({ "filename": name });
        self.bus.produce(task).await?;
        info!(document = %doc.uuid, path = %path, "file upload enqueued");
        Ok(doc)
    }

    /// Delete a document; the worker cascades to its vectors and file.
    pub async fn delete_document(&self, document_uuid: &str) -> Result<()> {
        self.bus.produce(IngestTask::delete(document_uuid)).await
    }

    /// Drain the bus, then drop everything else.
    pub async fn shutdown(&self) -> Result<()> {
        self.bus.stop().await?;
        info!("application state shut down");
        Ok(())
    }
}
