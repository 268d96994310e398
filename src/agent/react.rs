// src/agent/react.rs
// Straight reactive executor

use async_trait::async_trait;
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

/// The straight ReAct loop: think, act, observe, repeat, bounded by
/// `max_iterations`. Parse and tool failures inject a recovery hint and
/// retry until `max_retries` is exhausted, then degrade to a fallback
/// answer.
pub struct ReactAgent {
    llm: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    max_iterations: u32,
    max_retries: u32,
    llm_deadline: Duration,
    tool_deadline: Duration,
}

impl ReactAgent {
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
            max_retries: config.max_retries,
            llm_deadline: Duration::from_secs(deadlines.llm),
            tool_deadline: Duration::from_secs(deadlines.tool_call),
        }
    }
}

#[async_trait]
impl Agent for ReactAgent {
    async fn run(
        &self,
        question: &str,
        history: &[ChatMessage],
        sink: EventSink,
    ) -> Result<AgentOutcome> {
        let mut scratchpad = String::new();
        let mut documents: Vec<DocumentRef> = Vec::new();
        let mut error_count = 0u32;
        let mut steps = 0u32;
        let mut had_tool_results = false;

        while steps < self.max_iterations {
            steps += 1;

            let prompt = render_react_prompt(
                &self.tools.descriptions(),
                &self.tools.names_csv(),
                history,
                question,
                &scratchpad,
            );
            let output = match stream_llm_call(
                &self.llm,
                vec![ChatMessage::user(prompt)],
                &sink,
                self.llm_deadline,
            )
            .await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!(step = steps, error = %e, "llm call failed");
                    error_count += 1;
                    if error_count >= self.max_retries.max(1) {
                        return Ok(AgentOutcome {
                            answer: ERROR_FALLBACK.to_string(),
                            steps,
                            error_count,
                            documents,
                        });
                    }
                    scratchpad.push_str(&format!(
                        " {}\nThought:",
                        recovery_hint(e.kind(), &e.to_string())
                    ));
                    continue;
                }
            };

            match parse_llm_output(&output, &self.tools) {
                ParsedOutput::FinalAnswer { answer, .. } => {
                    debug!(steps, "react loop reached final answer");
                    return Ok(AgentOutcome {
                        answer,
                        steps,
                        error_count,
                        documents,
                    });
                }
                ParsedOutput::Action {
                    tool_name,
                    tool_input,
                    ..
                } => {
                    match run_tool(&self.tools, &tool_name, &tool_input, &sink, self.tool_deadline)
                        .await
                    {
                        Ok(round) => {
                            had_tool_results = true;
                            merge_documents(&mut documents, round.documents);
                            scratchpad.push_str(&format!(
                                " I need to use the {tool_name} tool.\nAction: {tool_name}\n\
                                 Action Input: {tool_input}\nObservation: {}\nThought:",
                                truncate_chars(&round.observation, OBSERVATION_SCRATCHPAD_LIMIT)
                            ));
                        }
                        Err(e) => {
                            warn!(tool = %tool_name, error = %e, "tool round failed");
                            error_count += 1;
                            if error_count >= self.max_retries.max(1) {
                                return Ok(AgentOutcome {
                                    answer: ERROR_FALLBACK.to_string(),
                                    steps,
                                    error_count,
                                    documents,
                                });
                            }
                            // The failure goes back as an observation so the
                            // model can pick an alternate path.
                            scratchpad.push_str(&format!(
                                " I need to use the {tool_name} tool.\nAction: {tool_name}\n\
                                 Action Input: {tool_input}\nObservation: tool execution \
                                 failed: {e}\nThought: {}\nThought:",
                                recovery_hint(e.kind(), &e.to_string())
                            ));
                        }
                    }
                }
                ParsedOutput::Unparsable { error } => {
                    warn!(step = steps, error = %error, "unparsable model output");
                    error_count += 1;
                    if error_count >= self.max_retries.max(1) {
                        return Ok(AgentOutcome {
                            answer: ERROR_FALLBACK.to_string(),
                            steps,
                            error_count,
                            documents,
                        });
                    }
                    scratchpad
                        .push_str(&format!(" {}\nThought:", recovery_hint("parse", &error)));
                }
            }
        }

        // Step budget exhausted without a Final Answer.
        if had_tool_results {
            let prompt = render_finalize_prompt(question, &scratchpad);
            match stream_llm_call(
                &self.llm,
                vec![ChatMessage::user(prompt)],
                &sink,
                self.llm_deadline,
            )
            .await
            {
                Ok(text) => {
                    let answer = text
                        .rsplit("Final Answer:")
                        .next()
                        .unwrap_or(&text)
                        .trim()
                        .to_string();
                    return Ok(AgentOutcome {
                        answer,
                        steps,
                        error_count,
                        documents,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "finalize call failed");
                    error_count += 1;
                }
            }
        }

        Ok(AgentOutcome {
            answer: NO_ANSWER_FALLBACK.to_string(),
            steps,
            error_count,
            documents,
        })
    }
}
