// src/tools/knowledge.rs
// RAG retrieval tool exposed to the agent

use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use super::ToolDef;
use crate::retrieval::{Retriever, SearchOptions};
use crate::store::Permission;

/// Context handed to the model is capped well below the model window; the
/// remainder of the budget belongs to history and the scratchpad.
const MAX_TOOL_CONTEXT_CHARS: usize = 10_000;

/// Knowledge-base search over the documents collection. The result is a
/// JSON object; the agent extracts `context` for its observation and the
/// reply pipeline collects `documents` for provenance.
pub fn knowledge_search_tool(retriever: Arc<Retriever>, permission: Permission) -> ToolDef {
    ToolDef::new(
        "knowledge_search",
        "Search the knowledge base for passages relevant to a question (retrieval-augmented generation)",
        false,
        move |input| {
            let retriever = Arc::clone(&retriever);
            Box::pin(async move {
                let (query, top_k) = parse_input(&input);
                debug!(query = %query, top_k, "knowledge search tool invoked");

                let options = SearchOptions {
                    top_k,
                    user_permission: permission,
                    ..SearchOptions::default()
                };
                let results = retriever.search(&query, options).await?;

                if results.is_empty() {
                    return Ok(json!({
                        "success": false,
                        "context": "",
                        "count": 0,
                        "documents": [],
                        "message": "no relevant passages found in the knowledge base",
                    })
                    .to_string());
                }

                let context =
                    crate::retrieval::format_context(&results, MAX_TOOL_CONTEXT_CHARS);
                let documents = Retriever::documents_of(&results);

                Ok(json!({
                    "success": true,
                    "context": context,
                    "count": results.len(),
                    "documents": documents,
                    "message": format!("found {} relevant passages", results.len()),
                })
                .to_string())
            })
        },
    )
}

/// Accepts either a bare query string or `{"query": ..., "top_k": ...}`.
fn parse_input(input: &str) -> (String, usize) {
    let trimmed = input.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        let query = map
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or(trimmed)
            .to_string();
        let top_k = map
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|v| v.clamp(1, 20) as usize)
            .unwrap_or(5);
        (query, top_k)
    } else {
        (trimmed.trim_matches('"').to_string(), 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_string_input_is_the_query() {
        let (query, top_k) = parse_input("color of bananas");
        assert_eq!(query, "color of bananas");
        assert_eq!(top_k, 5);
    }

    #[test]
    fn json_input_overrides_top_k() {
        let (query, top_k) = parse_input(r#"{"query": "banana color", "top_k": 3}"#);
        assert_eq!(query, "banana color");
        assert_eq!(top_k, 3);
    }

    #[test]
    fn quoted_input_is_unquoted() {
        let (query, _) = parse_input("\"hello\"");
        assert_eq!(query, "hello");
    }
}
