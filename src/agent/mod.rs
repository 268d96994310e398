// src/agent/mod.rs
// Tool-using reasoning agents (ReAct executor and state-graph variant)

pub mod graph;
pub mod output;
pub mod prompt;
pub mod react;

pub use graph::GraphAgent;
pub use output::{ParsedOutput, parse_llm_output};
pub use react::ReactAgent;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::{AgentConfig, AgentKind, DeadlineConfig};
use crate::error::{Result, TrellisError};
use crate::llm::{ChatMessage, LlmProvider};
use crate::store::DocumentRef;
use crate::tools::ToolRegistry;

/// Observation content pushed to the client is truncated to this length.
pub const OBSERVATION_EVENT_LIMIT: usize = 500;
/// Observation content kept in the scratchpad is truncated to this length.
pub const OBSERVATION_SCRATCHPAD_LIMIT: usize = 1000;

/// Events the agent emits to its caller while running.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Raw model token; the stream parser turns these into thought/answer
    /// events.
    LlmChunk(String),
    /// A tool is being invoked, rendered as `tool(input)`.
    Action(String),
    /// Tool output (truncated).
    Observation(String),
    /// Structured tool payload, used to aggregate document provenance.
    ToolResult(Value),
}

/// Channel the agent pushes events into; the reply pipeline consumes it.
pub type EventSink = mpsc::UnboundedSender<AgentEvent>;

/// Outcome of one agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: String,
    pub steps: u32,
    pub error_count: u32,
    pub documents: Vec<DocumentRef>,
}

/// Reasoning loop contract shared by both variants. Implementations stream
/// model tokens and tool events through the sink and resolve internal
/// failures into fallback answers; an `Err` means the turn itself broke.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(
        &self,
        question: &str,
        history: &[ChatMessage],
        sink: EventSink,
    ) -> Result<AgentOutcome>;
}

/// Config-time agent selection; no per-call dispatch.
pub fn build_agent(
    config: &AgentConfig,
    llm: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    deadlines: &DeadlineConfig,
) -> Box<dyn Agent> {
    match config.kind {
        AgentKind::React => Box::new(ReactAgent::new(llm, tools, config, deadlines)),
        AgentKind::Graph => Box::new(GraphAgent::new(llm, tools, config, deadlines)),
    }
}

/// Stream one LLM call, forwarding every token through the sink, and return
/// the concatenated text.
pub(crate) async fn stream_llm_call(
    llm: &Arc<dyn LlmProvider>,
    messages: Vec<ChatMessage>,
    sink: &EventSink,
    deadline: Duration,
) -> Result<String> {
    let mut stream = tokio::time::timeout(deadline, llm.stream(messages))
        .await
        .map_err(|_| TrellisError::Timeout("llm stream start".to_string()))??;

    let mut full = String::new();
    loop {
        let next = tokio::time::timeout(deadline, stream.next())
            .await
            .map_err(|_| TrellisError::Timeout("llm stream".to_string()))?;
        match next {
            Some(Ok(token)) => {
                full.push_str(&token);
                // A closed sink means the client went away; keep consuming
                // so the answer still completes for persistence callers.
                let _ = sink.send(AgentEvent::LlmChunk(token));
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }
    Ok(full)
}

/// Result of one tool dispatch.
pub(crate) struct ToolRound {
    pub observation: String,
    pub documents: Vec<DocumentRef>,
}

/// Invoke a tool with a deadline, emit action/observation/tool_result
/// events, and extract document provenance from JSON tool payloads.
pub(crate) async fn run_tool(
    tools: &ToolRegistry,
    tool_name: &str,
    tool_input: &str,
    sink: &EventSink,
    deadline: Duration,
) -> Result<ToolRound> {
    let Some(tool) = tools.get(tool_name) else {
        return Err(TrellisError::Tool {
            name: tool_name.to_string(),
            message: format!("unknown tool; available: {}", tools.names_csv()),
        });
    };

    let _ = sink.send(AgentEvent::Action(format!("{tool_name}({tool_input})")));

    let raw = tokio::time::timeout(deadline, tool.invoke(tool_input.to_string()))
        .await
        .map_err(|_| TrellisError::Timeout(format!("tool {tool_name}")))?
        .map_err(|e| TrellisError::Tool {
            name: tool_name.to_string(),
            message: e.to_string(),
        })?;

    // Tools that return a JSON object may carry a documents list plus a
    // pre-formatted context the model should see instead of raw JSON.
    let mut observation = raw.clone();
    let mut documents = Vec::new();
    if let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(&raw) {
        if let Some(Value::Array(doc_values)) = payload.get("documents") {
            for value in doc_values {
                match serde_json::from_value::<DocumentRef>(value.clone()) {
                    Ok(doc) if !doc.uuid.is_empty() => documents.push(doc),
                    _ => warn!("tool returned malformed document reference"),
                }
            }
            if !documents.is_empty() {
                let _ = sink.send(AgentEvent::ToolResult(
                    serde_json::json!({"documents": documents}),
                ));
            }
        }
        if let Some(context) = payload.get("context").and_then(|v| v.as_str()) {
            if !context.is_empty() {
                observation = context.to_string();
            }
        }
    }

    let _ = sink.send(AgentEvent::Observation(truncate_chars(
        &observation,
        OBSERVATION_EVENT_LIMIT,
    )));

    Ok(ToolRound {
        observation,
        documents,
    })
}

/// Merge tool-round documents into the run's list, deduped by uuid.
pub(crate) fn merge_documents(into: &mut Vec<DocumentRef>, new_docs: Vec<DocumentRef>) {
    for doc in new_docs {
        if !into.iter().any(|d| d.uuid == doc.uuid) {
            into.push(doc);
        }
    }
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_documents_dedupes_by_uuid() {
        let mut docs = vec![DocumentRef {
            uuid: "a".into(),
            name: "one".into(),
        }];
        merge_documents(
            &mut docs,
            vec![
                DocumentRef {
                    uuid: "a".into(),
                    name: "dup".into(),
                },
                DocumentRef {
                    uuid: "b".into(),
                    name: "two".into(),
                },
            ],
        );
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].uuid, "b");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 3), "hél");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
