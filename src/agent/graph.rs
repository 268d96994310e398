// src/agent/graph.rs
// State-graph agent variant with explicit error recovery

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::output::{ParsedOutput, parse_llm_output};
use super::prompt::{
    ERROR_FALLBACK, NO_ANSWER_FALLBACK, recovery_hint, render_finalize_prompt,
    render_react_prompt,
};
use super::{
    Agent, AgentOutcome, EventSink, OBSERVATION_SCRATCHPAD_LIMIT, merge_documents, run_tool,
    stream_llm_call, truncate_chars,
};
use crate::config::{AgentConfig, DeadlineConfig};
use crate::error::Result;
use crate::llm::{ChatMessage, LlmProvider};
use crate::store::DocumentRef;
use crate::tools::ToolRegistry;

/// Graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Think,
    Act,
    ErrorRecovery,
    Finalize,
}

/// Error kinds tracked in the state for routing and recovery hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    Parse,
    Tool,
    Timeout,
    Llm,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Tool => "tool",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Llm => "llm",
        }
    }

    fn of(err: &crate::error::TrellisError) -> Self {
        match err.kind() {
            "tool" => ErrorKind::Tool,
            "timeout" => ErrorKind::Timeout,
            "parse" => ErrorKind::Parse,
            _ => ErrorKind::Llm,
        }
    }
}

struct PendingAction {
    tool_name: String,
    tool_input: String,
}

/// Mutable state threaded through the graph.
struct GraphState {
    current_step: u32,
    max_steps: u32,
    error_count: u32,
    max_retries: u32,
    last_error: Option<String>,
    error_kind: Option<ErrorKind>,
    tool_results: Vec<Value>,
    final_answer: Option<String>,
    documents: Vec<DocumentRef>,
    scratchpad: String,
    pending_action: Option<PendingAction>,
}

impl GraphState {
    fn new(max_steps: u32, max_retries: u32) -> Self {
        Self {
            current_step: 0,
            max_steps,
            error_count: 0,
            max_retries,
            last_error: None,
            error_kind: None,
            tool_results: Vec::new(),
            final_answer: None,
            documents: Vec::new(),
            scratchpad: String::new(),
            pending_action: None,
        }
    }

    fn record_error(&mut self, kind: ErrorKind, detail: String) {
        self.last_error = Some(detail);
        self.error_kind = Some(kind);
        self.error_count += 1;
    }

    fn clear_error(&mut self) {
        self.last_error = None;
        self.error_kind = None;
    }
}

/// State-graph variant of the reasoning loop: think / act /
/// error_recovery / finalize nodes joined by explicit routing functions.
/// Same contract as [`super::ReactAgent`], selected by configuration.
pub struct GraphAgent {
    llm: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    max_iterations: u32,
    max_retries: u32,
    llm_deadline: Duration,
    tool_deadline: Duration,
}

impl GraphAgent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tools: ToolRegistry,
        config: &AgentConfig,
        deadlines: &DeadlineConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            max_iterations: config.max_iterations.max(1),
            max_retries: config.max_retries.max(1),
            llm_deadline: Duration::from_secs(deadlines.llm),
            tool_deadline: Duration::from_secs(deadlines.tool_call),
        }
    }

    async fn think(
        &self,
        state: &mut GraphState,
        question: &str,
        history: &[ChatMessage],
        sink: &EventSink,
    ) {
        state.current_step += 1;
        let prompt = render_react_prompt(
            &self.tools.descriptions(),
            &self.tools.names_csv(),
            history,
            question,
            &state.scratchpad,
        );

        let output = match stream_llm_call(
            &self.llm,
            vec![ChatMessage::user(prompt)],
            sink,
            self.llm_deadline,
        )
        .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(step = state.current_step, error = %e, "think node llm failure");
                state.record_error(ErrorKind::of(&e), e.to_string());
                return;
            }
        };

        match parse_llm_output(&output, &self.tools) {
            ParsedOutput::FinalAnswer { answer, .. } => {
                state.final_answer = Some(answer);
                state.clear_error();
            }
            ParsedOutput::Action {
                tool_name,
                tool_input,
                ..
            } => {
                state.pending_action = Some(PendingAction {
                    tool_name,
                    tool_input,
                });
                state.clear_error();
            }
            ParsedOutput::Unparsable { error } => {
                warn!(step = state.current_step, error = %error, "think node parse failure");
                state.record_error(ErrorKind::Parse, error);
            }
        }
    }

    async fn act(&self, state: &mut GraphState, sink: &EventSink) {
        let Some(action) = state.pending_action.take() else {
            state.record_error(ErrorKind::Parse, "no pending action".to_string());
            return;
        };

        match run_tool(
            &self.tools,
            &action.tool_name,
            &action.tool_input,
            sink,
            self.tool_deadline,
        )
        .await
        {
            Ok(round) => {
                state.scratchpad.push_str(&format!(
                    " I need to use the {} tool.\nAction: {}\nAction Input: {}\n\
                     Observation: {}\nThought:",
                    action.tool_name,
                    action.tool_name,
                    action.tool_input,
                    truncate_chars(&round.observation, OBSERVATION_SCRATCHPAD_LIMIT)
                ));
                state.tool_results.push(serde_json::json!({
                    "tool": action.tool_name,
                    "result": truncate_chars(&round.observation, 200),
                }));
                merge_documents(&mut state.documents, round.documents);
                state.clear_error();
            }
            Err(e) => {
                warn!(tool = %action.tool_name, error = %e, "act node failure");
                state.scratchpad.push_str(&format!(
                    " I need to use the {} tool.\nAction: {}\nAction Input: {}\n\
                     Observation: tool execution failed: {e}\nThought:",
                    action.tool_name, action.tool_name, action.tool_input
                ));
                state.record_error(ErrorKind::of(&e), e.to_string());
            }
        }
    }

    /// Inject a recovery hint, or end with a fallback once retries are
    /// spent.
    fn error_recovery(&self, state: &mut GraphState) {
        if state.error_count >= state.max_retries {
            warn!(
                errors = state.error_count,
                max = state.max_retries,
                "error budget exhausted, degrading"
            );
            state.final_answer = Some(ERROR_FALLBACK.to_string());
            return;
        }
        let kind = state.error_kind.map(ErrorKind::as_str).unwrap_or("other");
        let detail = state.last_error.clone().unwrap_or_default();
        state
            .scratchpad
            .push_str(&format!(" {}\nThought:", recovery_hint(kind, &detail)));
        state.clear_error();
    }

    async fn finalize(
        &self,
        state: &mut GraphState,
        question: &str,
        sink: &EventSink,
    ) -> String {
        if let Some(answer) = state.final_answer.take() {
            return answer;
        }

        if !state.tool_results.is_empty() {
            let prompt = render_finalize_prompt(question, &state.scratchpad);
            match stream_llm_call(
                &self.llm,
                vec![ChatMessage::user(prompt)],
                sink,
                self.llm_deadline,
            )
            .await
            {
                Ok(text) => {
                    return text
                        .rsplit("Final Answer:")
                        .next()
                        .unwrap_or(&text)
                        .trim()
                        .to_string();
                }
                Err(e) => {
                    warn!(error = %e, "finalize summarization failed");
                    state.error_count += 1;
                }
            }
        }

        NO_ANSWER_FALLBACK.to_string()
    }

    fn route_after_think(state: &GraphState) -> Node {
        if state.current_step >= state.max_steps
            || state.last_error.is_some()
            || state.final_answer.is_some()
        {
            return Node::Finalize;
        }
        if state.pending_action.is_some() {
            return Node::Act;
        }
        Node::Finalize
    }

    fn route_after_act(state: &GraphState) -> Node {
        if state.last_error.is_some() {
            return Node::ErrorRecovery;
        }
        if state.current_step >= state.max_steps {
            return Node::Finalize;
        }
        Node::Think
    }

    fn route_after_recovery(state: &GraphState) -> Node {
        if state.final_answer.is_some() {
            return Node::Finalize;
        }
        Node::Think
    }
}

#[async_trait]
impl Agent for GraphAgent {
    async fn run(
        &self,
        question: &str,
        history: &[ChatMessage],
        sink: EventSink,
    ) -> Result<AgentOutcome> {
        let mut state = GraphState::new(self.max_iterations, self.max_retries);
        let mut node = Node::Think;

        let answer = loop {
            match node {
                Node::Think => {
                    self.think(&mut state, question, history, &sink).await;
                    node = Self::route_after_think(&state);
                }
                Node::Act => {
                    self.act(&mut state, &sink).await;
                    node = Self::route_after_act(&state);
                }
                Node::ErrorRecovery => {
                    self.error_recovery(&mut state);
                    node = Self::route_after_recovery(&state);
                }
                Node::Finalize => {
                    break self.finalize(&mut state, question, &sink).await;
                }
            }
        };

        debug!(
            steps = state.current_step,
            errors = state.error_count,
            "graph agent run complete"
        );
        Ok(AgentOutcome {
            answer,
            steps: state.current_step,
            error_count: state.error_count,
            documents: state.documents,
        })
    }
}
