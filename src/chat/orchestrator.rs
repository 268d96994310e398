// src/chat/orchestrator.rs
// Per-turn state machine: session, files, agent reply, trace, summary

use futures::Stream;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::reply::{ReplyPipeline, ReplyRequest};
use super::{ImageAnalyzer, is_image_file};
use crate::error::Result;
use crate::history::HistoryMgr;
use crate::qa::{QaCache, QaJudge, SaveChain, TraceStore};
use crate::store::{DocStore, Kv, Permission, SendType, kv::last_ai_message_key, new_message};
use crate::stream::SseEvent;

/// Wait on the judge verdict before persisting the trace.
const JUDGE_COLLECT_SECS: u64 = 3;
/// Cached last-AI-message lifetime.
const LAST_AI_MESSAGE_TTL_SECS: u64 = 3600;

/// Inputs of one user turn.
#[derive(Debug, Clone, Default)]
pub struct SendMessageInputs {
    pub content: String,
    pub user_id: String,
    pub send_name: String,
    pub send_avatar: String,
    pub session_id: Option<String>,
    pub file_type: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<String>,
    /// Pre-parsed document text (extraction happens upstream).
    pub file_content: Option<String>,
    /// Raw image bytes; analyzed in-stream.
    pub file_bytes: Option<Vec<u8>>,
    pub show_thinking: bool,
    pub location: Option<String>,
    pub skip_cache: bool,
    pub regenerate_message_id: Option<String>,
}

/// Top-level per-turn coordinator. One call produces the full SSE event
/// stream for a turn; every stream ends with exactly one `done` or `error`.
pub struct MsgOrchestrator {
    docstore: Arc<DocStore>,
    kv: Arc<Kv>,
    history: Arc<HistoryMgr>,
    judge: Arc<QaJudge>,
    trace: Arc<TraceStore>,
    cache: Arc<QaCache>,
    reply: Arc<ReplyPipeline>,
    image_analyzer: Option<Arc<dyn ImageAnalyzer>>,
    model_name: String,
}

impl MsgOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        docstore: Arc<DocStore>,
        kv: Arc<Kv>,
        history: Arc<HistoryMgr>,
        judge: Arc<QaJudge>,
        trace: Arc<TraceStore>,
        cache: Arc<QaCache>,
        reply: Arc<ReplyPipeline>,
        image_analyzer: Option<Arc<dyn ImageAnalyzer>>,
        model_name: String,
    ) -> Self {
        Self {
            docstore,
            kv,
            history,
            judge,
            trace,
            cache,
            reply,
            image_analyzer,
            model_name,
        }
    }

    /// Execute one turn, yielding SSE events as the turn progresses.
    pub fn send_message_stream(
        self: Arc<Self>,
        inputs: SendMessageInputs,
    ) -> impl Stream<Item = SseEvent> + Send {
        async_stream::stream! {
            if inputs.content.trim().is_empty() {
                yield SseEvent::Error { message: "message content must not be empty".to_string() };
                return;
            }

            // 1. Resolve the session.
            let (session_id, session_name) =
                match self.resolve_session(&inputs).await {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "session resolution failed");
                        yield SseEvent::Error { message: e.to_string() };
                        return;
                    }
                };
            yield SseEvent::SessionCreated {
                session_id: session_id.clone(),
                session_name,
            };

            // 2/3. File augmentation: images are analyzed in-stream,
            // documents arrive pre-parsed.
            let mut enhanced_content = inputs.content.clone();
            let mut file_content = inputs.file_content.clone();
            let image_upload = matches!(
                (&inputs.file_bytes, &inputs.file_name),
                (Some(_), Some(name)) if is_image_file(name)
            );

            if let (true, Some(bytes), Some(name)) =
                (image_upload, &inputs.file_bytes, &inputs.file_name)
            {
                if let Some(analyzer) = &self.image_analyzer {
                    yield SseEvent::Thought {
                        content: format!("Analyzing the uploaded image: {name}"),
                    };
                    let (tx, mut rx) = mpsc::unbounded_channel();
                    let analyzer = Arc::clone(analyzer);
                    let bytes = bytes.clone();
                    let name_owned = name.clone();
                    let task = tokio::spawn(async move {
                        analyzer.analyze_stream(&bytes, &name_owned, tx).await
                    });
                    while let Some(event) = rx.recv().await {
                        if inputs.show_thinking || !matches!(event, SseEvent::Thought { .. }) {
                            yield event;
                        }
                    }
                    match task.await {
                        Ok(Ok(analysis)) => {
                            yield SseEvent::ImageAnalysisComplete {
                                combined_content: analysis.combined_content.clone(),
                                image_info: analysis.image_info.clone(),
                                ocr_text: analysis.ocr_text.clone(),
                                vision_description: analysis.vision_description.clone(),
                            };
                            enhanced_content = format!(
                                "Here is the image I uploaded (filename: {name}):\n\n{}\n\n---\n\nMy question: {}",
                                analysis.combined_content, inputs.content
                            );
                            file_content = Some(analysis.combined_content);
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "image analysis failed, continuing without it");
                        }
                        Err(e) => {
                            warn!(error = %e, "image analysis task failed");
                        }
                    }
                } else {
                    warn!("image uploaded but no analyzer is configured");
                }
            } else if let Some(text) = &file_content {
                let label = inputs
                    .file_type
                    .as_deref()
                    .map(|t| t.to_uppercase())
                    .unwrap_or_else(|| "".to_string());
                let name = inputs.file_name.as_deref().unwrap_or("upload");
                enhanced_content = format!(
                    "Here is the {label} file I uploaded (filename: {name}):\n\n{text}\n\n---\n\nMy question: {}",
                    inputs.content
                );
            }

            // 4. Persist the USER message with the original content.
            let user_msg_uuid = match self
                .save_user_message(&session_id, &inputs, file_content.as_deref())
                .await
            {
                Ok(uuid) => uuid,
                Err(e) => {
                    error!(error = %e, "user message persist failed");
                    yield SseEvent::Error { message: e.to_string() };
                    return;
                }
            };
            yield SseEvent::UserMessageSaved {
                uuid: user_msg_uuid.clone(),
                content: inputs.content.clone(),
            };

            // 5. History, permission, async judge, regenerate eviction.
            let mut history = match self.history.load(&session_id).await {
                Ok(h) => h,
                Err(e) => {
                    error!(error = %e, "history load failed");
                    yield SseEvent::Error { message: e.to_string() };
                    return;
                }
            };
            // The just-saved user message is the question itself; the agent
            // receives it separately, not as history.
            history.pop();
            let user_permission = match self.docstore.user_permission(&inputs.user_id).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "permission lookup failed, defaulting to public");
                    Permission::Public
                }
            };

            let evaluation_id = format!("{session_id}:{user_msg_uuid}");
            self.judge.start_evaluation(&inputs.content, &evaluation_id);

            if inputs.skip_cache {
                if let Some(old_message_id) = &inputs.regenerate_message_id {
                    self.evict_regenerated(old_message_id).await;
                }
            }

            // 6/7. Drive the agent reply, forwarding events as they arrive.
            let mut ai_input = enhanced_content.clone();
            if let Some(location) = &inputs.location {
                ai_input = format!("{ai_input}\n\n[system]\nUser location: {location}");
            }

            let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SseEvent>();
            let pipeline = Arc::clone(&self.reply);
            let original_question = inputs.content.clone();
            let history_for_agent = history.clone();
            let skip_cache = inputs.skip_cache;
            let reply_task = tokio::spawn(async move {
                pipeline
                    .generate(
                        ReplyRequest {
                            user_message: &ai_input,
                            original_question: &original_question,
                            history: &history_for_agent,
                            user_permission,
                            skip_cache,
                        },
                        &events_tx,
                    )
                    .await
            });

            while let Some(event) = events_rx.recv().await {
                let forward = match &event {
                    SseEvent::Thought { .. }
                    | SseEvent::Action { .. }
                    | SseEvent::Observation { .. } => inputs.show_thinking,
                    _ => true,
                };
                if forward {
                    yield event;
                }
            }

            let outcome = match reply_task.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    error!(error = %e, "reply generation failed");
                    yield SseEvent::Error { message: e.to_string() };
                    return;
                }
                Err(e) => {
                    error!(error = %e, "reply task failed");
                    yield SseEvent::Error { message: e.to_string() };
                    return;
                }
            };

            // 8-11. Persist the AI side of the turn.
            if !outcome.answer.trim().is_empty() {
                let ai_msg_uuid = match self
                    .save_ai_message(&session_id, &inputs, &outcome)
                    .await
                {
                    Ok(uuid) => uuid,
                    Err(e) => {
                        error!(error = %e, "ai message persist failed");
                        yield SseEvent::Error { message: e.to_string() };
                        return;
                    }
                };

                // 9. Reuse the cached chain or persist a fresh trace.
                let thought_chain_id = match &outcome.cached_thought_chain_id {
                    Some(cached) => {
                        debug!(chain = %cached, "reusing cached thought chain");
                        Some(cached.clone())
                    }
                    None => {
                        let should_cache = self
                            .judge
                            .await_result(&evaluation_id, Duration::from_secs(JUDGE_COLLECT_SECS))
                            .await;
                        match self
                            .trace
                            .save_chain(SaveChain {
                                session_id: &session_id,
                                question: &inputs.content,
                                answer: &outcome.answer,
                                thoughts: &outcome.thoughts,
                                actions: &outcome.actions,
                                observations: &outcome.observations,
                                documents_used: outcome.documents.clone(),
                                user_id: Some(inputs.user_id.as_str()),
                                message_id: Some(ai_msg_uuid.as_str()),
                                model_name: Some(self.model_name.as_str()),
                                should_cache,
                            })
                            .await
                        {
                            Ok(chain_id) => Some(chain_id),
                            Err(e) => {
                                error!(error = %e, "trace persist failed");
                                None
                            }
                        }
                    }
                };

                yield SseEvent::AiMessageSaved {
                    uuid: ai_msg_uuid,
                    content: outcome.answer.clone(),
                    thought_chain_id,
                };

                // 11. Session upkeep: last message, summarization threshold,
                // first-turn auto-naming.
                if let Err(e) = self
                    .docstore
                    .update_session_last_message(&session_id, &outcome.answer)
                    .await
                {
                    warn!(error = %e, "session last_message update failed");
                }
                if let Err(e) = self.history.maybe_summarize(&session_id).await {
                    warn!(error = %e, "summarization failed");
                }
                match self.docstore.count_non_summary_messages(&session_id).await {
                    Ok(2) => {
                        let history_mgr = Arc::clone(&self.history);
                        let session = session_id.clone();
                        let question = inputs.content.clone();
                        let answer = outcome.answer.clone();
                        tokio::spawn(async move {
                            if let Err(e) = history_mgr
                                .auto_name_session(&session, &question, &answer)
                                .await
                            {
                                warn!(error = %e, "session auto-naming failed");
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "message count failed"),
                }
            } else {
                self.judge.cancel(&evaluation_id);
            }

            // 12. Terminal event.
            yield SseEvent::Done {
                session_id: session_id.clone(),
            };
        }
    }

    /// Existing session, or a new one named from the first 10 characters of
    /// the content.
    async fn resolve_session(&self, inputs: &SendMessageInputs) -> Result<(String, String)> {
        if let Some(session_id) = &inputs.session_id {
            if let Some(session) = self.docstore.get_session(session_id).await? {
                return Ok((session.uuid, session.name));
            }
            warn!(session = %session_id, "unknown session id, creating a new one");
        }

        let chars: Vec<char> = inputs.content.chars().collect();
        let name = if chars.len() > 10 {
            format!("{}...", chars[..10].iter().collect::<String>())
        } else {
            inputs.content.clone()
        };
        let session = self
            .docstore
            .create_session(&inputs.user_id, &name, &inputs.content)
            .await?;
        info!(session = %session.uuid, name = %name, "session created");
        Ok((session.uuid, name))
    }

    async fn save_user_message(
        &self,
        session_id: &str,
        inputs: &SendMessageInputs,
        file_content: Option<&str>,
    ) -> Result<String> {
        let mut message = new_message(
            session_id,
            &inputs.content,
            SendType::User,
            &inputs.user_id,
            "system",
        );
        message.send_name = inputs.send_name.clone();
        message.send_avatar = inputs.send_avatar.clone();
        message.file_type = inputs.file_type.clone();
        message.file_name = inputs.file_name.clone();
        message.file_size = inputs.file_size.clone();

        let mut extra = serde_json::Map::new();
        if let Some(parsed) = file_content {
            extra.insert("parsed_content".to_string(), json!(parsed));
        }
        if let Some(location) = &inputs.location {
            extra.insert("location".to_string(), json!(location));
        }
        message.extra = Value::Object(extra);

        self.docstore.insert_message(&message).await?;
        debug!(message = %message.uuid, "user message saved");
        Ok(message.uuid)
    }

    async fn save_ai_message(
        &self,
        session_id: &str,
        inputs: &SendMessageInputs,
        outcome: &super::reply::ReplyOutcome,
    ) -> Result<String> {
        let mut message = new_message(
            session_id,
            &outcome.answer,
            SendType::Ai,
            "system",
            &inputs.user_id,
        );
        message.send_name = "AI Assistant".to_string();

        let mut extra = serde_json::Map::new();
        extra.insert("documents".to_string(), json!(outcome.documents));
        if inputs.show_thinking {
            extra.insert("thoughts".to_string(), json!(outcome.thoughts));
            extra.insert("actions".to_string(), json!(outcome.actions));
            extra.insert("observations".to_string(), json!(outcome.observations));
        }
        message.extra = Value::Object(extra);

        self.docstore.insert_message(&message).await?;

        // Best-effort cache of the latest answer.
        if let Err(e) = self
            .kv
            .set_ex(
                &last_ai_message_key(session_id),
                &outcome.answer,
                LAST_AI_MESSAGE_TTL_SECS,
            )
            .await
        {
            warn!(error = %e, "last-ai-message cache write failed");
        }

        debug!(message = %message.uuid, documents = outcome.documents.len(), "ai message saved");
        Ok(message.uuid)
    }

    /// Regenerate flow: the old answer's cache entry must not be served
    /// again.
    async fn evict_regenerated(&self, old_message_id: &str) {
        match self.docstore.find_chain_by_message(old_message_id).await {
            Ok(Some(chain)) if chain.is_cached => {
                if let Err(e) = self.cache.delete_cache(&chain.uuid).await {
                    warn!(chain = %chain.uuid, error = %e, "stale cache eviction failed");
                } else {
                    debug!(chain = %chain.uuid, "stale cache entry evicted for regenerate");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "regenerate chain lookup failed"),
        }
    }
}
