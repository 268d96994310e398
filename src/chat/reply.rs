// src/chat/reply.rs
// Reply pipeline: cache probe, agent drive, token-stream fan-in

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::{AgentEvent, build_agent};
use crate::config::{AgentConfig, DeadlineConfig};
use crate::error::Result;
use crate::llm::{ChatMessage, LlmProvider};
use crate::qa::QaCache;
use crate::retrieval::Retriever;
use crate::store::{DocumentRef, Permission};
use crate::stream::{ParsedEvent, SseEvent, StreamParser};
use crate::tools;

/// One reply request. `user_message` may carry file/image/location
/// augmentation; `original_question` is the user's text as typed and is
/// what the cache and the judge see.
pub struct ReplyRequest<'a> {
    pub user_message: &'a str,
    pub original_question: &'a str,
    pub history: &'a [ChatMessage],
    pub user_permission: Permission,
    pub skip_cache: bool,
}

/// Aggregates collected while streaming one reply.
#[derive(Debug, Default)]
pub struct ReplyOutcome {
    pub answer: String,
    pub thoughts: Vec<String>,
    pub actions: Vec<String>,
    pub observations: Vec<String>,
    pub documents: Vec<DocumentRef>,
    /// Set when the answer was served from the similar-QA cache.
    pub cached_thought_chain_id: Option<String>,
    pub error_count: u32,
    pub steps: u32,
}

/// Drives one answer: probes the similar-QA cache, else runs the agent and
/// converts its token/callback events into client events. Client events go
/// out through the provided channel as they happen; the aggregate comes
/// back in the returned outcome.
pub struct ReplyPipeline {
    llm: Arc<dyn LlmProvider>,
    retriever: Arc<Retriever>,
    cache: Arc<QaCache>,
    agent_config: AgentConfig,
    deadlines: DeadlineConfig,
}

impl ReplyPipeline {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        retriever: Arc<Retriever>,
        cache: Arc<QaCache>,
        agent_config: AgentConfig,
        deadlines: DeadlineConfig,
    ) -> Self {
        Self {
            llm,
            retriever,
            cache,
            agent_config,
            deadlines,
        }
    }

    pub async fn generate(
        &self,
        request: ReplyRequest<'_>,
        events: &mpsc::UnboundedSender<SseEvent>,
    ) -> Result<ReplyOutcome> {
        // Cache probe runs on the original question, never the augmented
        // message.
        if let Some(hit) = self
            .cache
            .find_similar(request.original_question, request.skip_cache)
            .await
        {
            info!(
                chain = %hit.thought_chain_id,
                similarity = format!("{:.4}", hit.similarity),
                "serving cached answer"
            );
            let _ = events.send(SseEvent::AnswerChunk {
                content: hit.answer.clone(),
            });
            if !hit.documents.is_empty() {
                let _ = events.send(SseEvent::Documents {
                    documents: hit.documents.clone(),
                });
            }
            return Ok(ReplyOutcome {
                answer: hit.answer,
                documents: hit.documents,
                cached_thought_chain_id: Some(hit.thought_chain_id),
                ..Default::default()
            });
        }

        // Per-request tool registry; admin-only tools are invisible to
        // public users.
        let registry =
            tools::build_registry(Arc::clone(&self.retriever), request.user_permission);
        let agent = build_agent(
            &self.agent_config,
            Arc::clone(&self.llm),
            registry,
            &self.deadlines,
        );

        let (sink, mut agent_events) = mpsc::unbounded_channel::<AgentEvent>();
        let question = request.user_message.to_string();
        let history = request.history.to_vec();
        let agent_task =
            tokio::spawn(async move { agent.run(&question, &history, sink).await });

        let mut parser = StreamParser::new();
        let mut outcome = ReplyOutcome::default();
        let mut current_thought = String::new();

        // The sink is dropped when the agent task finishes, closing this
        // loop.
        while let Some(event) = agent_events.recv().await {
            match event {
                AgentEvent::LlmChunk(token) => {
                    if let Some(parsed) = parser.parse_chunk(&token) {
                        match parsed {
                            ParsedEvent::Thought(chunk) => {
                                current_thought.push_str(&chunk);
                                let _ = events.send(SseEvent::Thought { content: chunk });
                            }
                            ParsedEvent::AnswerChunk(chunk) => {
                                outcome.answer.push_str(&chunk);
                                let _ = events.send(SseEvent::AnswerChunk { content: chunk });
                            }
                            // Never produced from the token path.
                            ParsedEvent::Action(_) | ParsedEvent::Observation(_) => {}
                        }
                    }
                }
                AgentEvent::Action(content) => {
                    if !current_thought.trim().is_empty() {
                        outcome.thoughts.push(current_thought.trim().to_string());
                        current_thought.clear();
                    }
                    parser.handle_agent_event(ParsedEvent::Action(content.clone()));
                    outcome.actions.push(content.clone());
                    let _ = events.send(SseEvent::Action { content });
                }
                AgentEvent::Observation(content) => {
                    parser.handle_agent_event(ParsedEvent::Observation(content.clone()));
                    outcome.observations.push(content.clone());
                    let _ = events.send(SseEvent::Observation { content });
                }
                AgentEvent::ToolResult(payload) => {
                    if let Some(docs) = payload.get("documents") {
                        if let Ok(refs) =
                            serde_json::from_value::<Vec<DocumentRef>>(docs.clone())
                        {
                            for doc in refs {
                                if !outcome.documents.iter().any(|d| d.uuid == doc.uuid) {
                                    outcome.documents.push(doc);
                                }
                            }
                        }
                    }
                }
            }
        }
        if !current_thought.trim().is_empty() {
            outcome.thoughts.push(current_thought.trim().to_string());
        }

        let agent_outcome = match agent_task.await {
            Ok(Ok(agent_outcome)) => agent_outcome,
            Ok(Err(e)) => return Err(e),
            Err(join_err) => return Err(join_err.into()),
        };
        outcome.error_count = agent_outcome.error_count;
        outcome.steps = agent_outcome.steps;
        for doc in agent_outcome.documents {
            if !outcome.documents.iter().any(|d| d.uuid == doc.uuid) {
                outcome.documents.push(doc);
            }
        }

        // The stream may have ended inside an unflushed Answer.
        let mut answer_delivered = parser.is_answer_sent();
        if !answer_delivered {
            if let Some(remaining) = parser.get_remaining_answer() {
                outcome.answer.push_str(&remaining);
                let _ = events.send(SseEvent::AnswerChunk { content: remaining });
                answer_delivered = true;
            }
        }

        // Fallback and finalize answers never pass through the parser's
        // answer state; deliver them whole, unless the final string is just
        // the last observation repeated.
        if !answer_delivered && !agent_outcome.answer.is_empty() {
            if parser.should_skip_duplicate_answer(&agent_outcome.answer) {
                debug!("final answer equals last observation, not re-emitting");
                outcome.answer = agent_outcome.answer;
            } else {
                outcome.answer = agent_outcome.answer.clone();
                let _ = events.send(SseEvent::AnswerChunk {
                    content: agent_outcome.answer,
                });
            }
        } else if outcome.answer.is_empty() {
            outcome.answer = agent_outcome.answer;
        }

        if !outcome.documents.is_empty() {
            let _ = events.send(SseEvent::Documents {
                documents: outcome.documents.clone(),
            });
        }

        if outcome.answer.trim().is_empty() {
            warn!("reply pipeline produced an empty answer");
        }
        Ok(outcome)
    }
}
