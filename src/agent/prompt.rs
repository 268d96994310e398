// src/agent/prompt.rs
// Fixed prompts for the reasoning loop

use crate::llm::ChatMessage;

/// Answer when the loop exhausted its budget without any usable result.
pub const NO_ANSWER_FALLBACK: &str =
    "I'm sorry, I could not find the information needed to answer your question.";

/// Answer when repeated errors forced the loop to give up.
pub const ERROR_FALLBACK: &str =
    "I'm sorry, I ran into problems while working on this. Based on what I could gather, I \
     cannot give you a reliable answer right now.";

/// Render the ReAct system prompt with the tool table, optional prior
/// conversation, the question, and the accumulated scratchpad. The template
/// enforces: one action per turn, Thought before every Action, and a fresh
/// Thought after each Observation.
pub fn render_react_prompt(
    tools_description: &str,
    tool_names: &str,
    history: &[ChatMessage],
    question: &str,
    scratchpad: &str,
) -> String {
    let chat_history = render_history(history);
    format!(
        "Answer the following question as best you can. You have access to these tools:\n\
         \n\
         {tools_description}\n\
         \n\
         Use exactly this format:\n\
         \n\
         Question: the question to answer\n\
         Thought: reason about what to do next\n\
         Action: the tool to use, one of [{tool_names}]\n\
         Action Input: the input for the action\n\
         Observation: the result of the action\n\
         ... (Thought/Action/Action Input/Observation can repeat N times)\n\
         Thought: I now know the final answer\n\
         Final Answer: the final answer to the original question\n\
         \n\
         Rules:\n\
         1. Take exactly one Action per turn.\n\
         2. Emit the Action and its Action Input in the same turn, then stop and wait \
         for the Observation.\n\
         3. After an Observation, emit a new Thought before deciding the next step.\n\
         4. Once the answer is certain, emit the Final Answer directly; everything after \
         a Final Answer is ignored.\n\
         5. If earlier conversation is provided, interpret the question in its context.\n\
         \n\
         {chat_history}\
         Begin!\n\
         \n\
         Question: {question}\n\
         Thought:{scratchpad}"
    )
}

fn render_history(history: &[ChatMessage]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut text = String::from("--- earlier conversation begins ---\n");
    for msg in history {
        let speaker = match msg.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            _ => "System",
        };
        text.push_str(&format!("{speaker}: {}\n", msg.content));
    }
    text.push_str("--- earlier conversation ends; the new question follows ---\n\n");
    text
}

/// Prompt for the finalize step: no Final Answer arrived but tool results
/// exist, so one more call condenses them into an answer.
pub fn render_finalize_prompt(question: &str, scratchpad: &str) -> String {
    format!(
        "Based on the tool results below, give a concise final answer.\n\
         \n\
         User question: {question}\n\
         \n\
         Tool results:\n\
         {scratchpad}\n\
         \n\
         Answer directly; do not call any more tools."
    )
}

/// Recovery hint injected into the scratchpad before a retry round.
pub fn recovery_hint(error_kind: &str, detail: &str) -> String {
    match error_kind {
        "tool" => format!(
            "The tool call failed: {detail}. Try a different tool or simpler input, or \
             answer from what you already know."
        ),
        "parse" => format!(
            "Format error: {detail}. Follow the Thought / Action / Action Input format exactly."
        ),
        "timeout" => format!("The operation timed out: {detail}. Try a simpler request."),
        "llm" => format!("Processing error: {detail}. Reconsider the approach."),
        _ => format!("Something went wrong: {detail}. Try a different approach."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_tools_and_question() {
        let prompt = render_react_prompt(
            "knowledge_search: search the knowledge base",
            "knowledge_search",
            &[],
            "What color are bananas?",
            "",
        );
        assert!(prompt.contains("knowledge_search: search the knowledge base"));
        assert!(prompt.contains("one of [knowledge_search]"));
        assert!(prompt.contains("Question: What color are bananas?"));
        assert!(prompt.ends_with("Thought:"));
        assert!(!prompt.contains("earlier conversation"));
    }

    #[test]
    fn history_is_rendered_with_speakers() {
        let history = vec![
            ChatMessage::user("first question"),
            ChatMessage::assistant("first answer"),
        ];
        let prompt = render_react_prompt("t: d", "t", &history, "q", "");
        assert!(prompt.contains(
            "--- earlier conversation begins ---\nUser: first question\nAssistant: first answer\n"
        ));
    }

    #[test]
    fn hints_name_the_error_kind() {
        assert!(recovery_hint("parse", "bad label").contains("Format error"));
        assert!(recovery_hint("tool", "boom").contains("tool call failed"));
        assert!(recovery_hint("other", "x").contains("different approach"));
    }
}
