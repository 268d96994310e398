// src/agent/output.rs
// Parser for the Thought / Action / Final Answer text grammar

use regex::Regex;
use std::sync::LazyLock;

use crate::tools::ToolRegistry;

static FINAL_ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Final Answer:\s*(.*)\z").unwrap());
static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Action:\s*([^\n]+)").unwrap());
static ACTION_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Action Input:\s*(.*?)(?:\nObservation:|\z)").unwrap());

/// Parsed shape of one model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOutput {
    FinalAnswer {
        thought: String,
        answer: String,
    },
    Action {
        thought: String,
        tool_name: String,
        tool_input: String,
    },
    Unparsable {
        error: String,
    },
}

/// Extract the model's decision from its raw text output.
///
/// Precedence: a Final Answer wins over a trailing Action (the prompt makes
/// Answer terminal); a well-formed Action referencing a known tool is next;
/// bare text with neither label is treated as a direct answer; everything
/// else is a parse failure.
pub fn parse_llm_output(text: &str, tools: &ToolRegistry) -> ParsedOutput {
    let thought = extract_thought(text);

    if let Some(captures) = FINAL_ANSWER_RE.captures(text) {
        let answer = captures[1].trim().to_string();
        return ParsedOutput::FinalAnswer { thought, answer };
    }

    if let Some(captures) = ACTION_RE.captures(text) {
        let tool_name = captures[1].trim().to_string();
        let tool_input = ACTION_INPUT_RE
            .captures(text)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();

        if tool_name.is_empty() {
            return ParsedOutput::Unparsable {
                error: "Action line without a tool name".to_string(),
            };
        }
        if tools.get(&tool_name).is_none() {
            return ParsedOutput::Unparsable {
                error: format!(
                    "unknown tool: {tool_name}; available tools: {}",
                    tools.names_csv()
                ),
            };
        }
        return ParsedOutput::Action {
            thought,
            tool_name,
            tool_input,
        };
    }

    // No explicit labels at all: treat non-empty text as a direct answer.
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        let answer = trimmed
            .strip_prefix("Thought:")
            .map(|rest| rest.trim())
            .unwrap_or(trimmed)
            .to_string();
        if !answer.is_empty() {
            return ParsedOutput::FinalAnswer { thought, answer };
        }
    }

    ParsedOutput::Unparsable {
        error: "output matched neither Action nor Final Answer".to_string(),
    }
}

fn extract_thought(text: &str) -> String {
    let start = match text.find("Thought:") {
        Some(pos) => pos + "Thought:".len(),
        // The prompt ends with "Thought:" so output usually starts mid-thought.
        None => 0,
    };
    let rest = &text[start..];
    let end = ["Action:", "Final Answer:"]
        .iter()
        .filter_map(|label| rest.find(label))
        .min()
        .unwrap_or(rest.len());
    rest[..end].trim().to_string()
}
