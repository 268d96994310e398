// tests/orchestrator_flow_test.rs
// End-to-end turns: cache hit path, eviction re-execution, summarization,
// stream terminality

mod common;

use common::{ScriptedLlm, test_config, test_state};
use futures::StreamExt;
use std::sync::Arc;
use trellis::chat::SendMessageInputs;
use trellis::qa::Feedback;
use trellis::store::Permission;
use trellis::stream::SseEvent;

const SEARCH_TURN: &str =
    "Thought: I should search the knowledge base.\nAction: knowledge_search\nAction Input: what is RAG";
const ANSWER_TURN: &str =
    "Thought: I now know the final answer\nFinal Answer: RAG grounds answers in retrieved documents.";

async fn run_turn(state: &trellis::AppState, inputs: SendMessageInputs) -> Vec<SseEvent> {
    let stream = Arc::clone(&state.orchestrator).send_message_stream(inputs);
    futures::pin_mut!(stream);
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

fn inputs(content: &str, session_id: Option<String>) -> SendMessageInputs {
    SendMessageInputs {
        content: content.to_string(),
        user_id: "u-1".to_string(),
        send_name: "Tester".to_string(),
        show_thinking: true,
        session_id,
        ..SendMessageInputs::default()
    }
}

fn answer_text(events: &[SseEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            SseEvent::AnswerChunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn has_action(events: &[SseEvent]) -> bool {
    events.iter().any(|e| matches!(e, SseEvent::Action { .. }))
}

#[tokio::test]
async fn cache_hit_serves_the_prior_answer_without_the_agent() {
    let chat = ScriptedLlm::new(vec![SEARCH_TURN, ANSWER_TURN], "Final Answer: fallback");
    let utility = ScriptedLlm::new(vec![], "YES");
    let state = test_state(test_config(), chat, utility).await;
    state.start_ingestion().await.unwrap();

    let doc = state
        .upload_text(
            "rag.txt",
            "RAG stands for retrieval augmented generation. RAG grounds large language \
             model answers in retrieved documents.",
            Permission::Public,
        )
        .await
        .unwrap();
    common::wait_for_terminal(&state, &doc.uuid).await;

    // Turn 1: the agent searches, answers, and the judge approves caching.
    let first = run_turn(&state, inputs("What is RAG?", None)).await;
    assert!(matches!(first.last(), Some(SseEvent::Done { .. })));
    assert!(has_action(&first), "agent did not run a tool on the first turn");
    let first_answer = answer_text(&first);
    assert!(first_answer.contains("grounds answers in retrieved documents"));
    let first_documents = first.iter().find_map(|e| match e {
        SseEvent::Documents { documents } => Some(documents.clone()),
        _ => None,
    });
    let first_documents = first_documents.expect("documents event on first turn");
    assert_eq!(first_documents[0].uuid, doc.uuid);

    let first_chain_id = first
        .iter()
        .find_map(|e| match e {
            SseEvent::AiMessageSaved {
                thought_chain_id, ..
            } => thought_chain_id.clone(),
            _ => None,
        })
        .expect("thought chain id on first turn");

    // Turn 2: a paraphrase is served from the cache; no tool runs.
    let second = run_turn(&state, inputs("Tell me what RAG means", None)).await;
    assert!(matches!(second.last(), Some(SseEvent::Done { .. })));
    assert!(!has_action(&second), "cache hit still executed the agent");
    assert!(answer_text(&second).contains(&first_answer));

    let second_documents = second
        .iter()
        .find_map(|e| match e {
            SseEvent::Documents { documents } => Some(documents.clone()),
            _ => None,
        })
        .expect("documents event on cached turn");
    assert_eq!(second_documents[0].uuid, doc.uuid);

    let second_chain_id = second
        .iter()
        .find_map(|e| match e {
            SseEvent::AiMessageSaved {
                thought_chain_id, ..
            } => thought_chain_id.clone(),
            _ => None,
        })
        .expect("thought chain id on cached turn");
    assert_eq!(second_chain_id, first_chain_id, "cached turn minted a new chain");

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn eviction_forces_the_agent_to_run_again() {
    let chat = ScriptedLlm::new(vec![SEARCH_TURN, ANSWER_TURN], "Final Answer: fallback");
    let chat_script = Arc::clone(&chat);
    let utility = ScriptedLlm::new(vec![], "YES");
    let state = test_state(test_config(), chat, utility).await;
    state.start_ingestion().await.unwrap();

    let doc = state
        .upload_text(
            "rag.txt",
            "RAG stands for retrieval augmented generation.",
            Permission::Public,
        )
        .await
        .unwrap();
    common::wait_for_terminal(&state, &doc.uuid).await;

    let first = run_turn(&state, inputs("What is RAG?", None)).await;
    let chain_id = first
        .iter()
        .find_map(|e| match e {
            SseEvent::AiMessageSaved {
                thought_chain_id, ..
            } => thought_chain_id.clone(),
            _ => None,
        })
        .expect("chain id");

    // Three distinct users dislike the cached answer.
    for user in ["u-a", "u-b", "u-c"] {
        state
            .cache
            .update_feedback(&chain_id, user, Feedback::Dislike)
            .await
            .unwrap();
    }
    let chain = state.docstore.get_thought_chain(&chain_id).await.unwrap().unwrap();
    assert!(!chain.is_cached);

    // The same question now re-executes the agent loop.
    chat_script.push(SEARCH_TURN);
    chat_script.push(ANSWER_TURN);
    let third = run_turn(&state, inputs("What is RAG?", None)).await;
    assert!(has_action(&third), "evicted question did not rerun the agent");
    assert!(matches!(third.last(), Some(SseEvent::Done { .. })));

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn summary_threshold_compacts_the_session() {
    let mut config = test_config();
    config.history.summary_threshold = 4;

    let chat = ScriptedLlm::new(
        vec![
            "Final Answer: answer one",
            "Final Answer: answer two",
            "Final Answer: answer three",
        ],
        "Final Answer: spare",
    );
    let utility = ScriptedLlm::new(vec![], "A short chat about fruit colors.");
    let state = test_state(config, chat, utility).await;

    let first = run_turn(&state, inputs("What color are apples usually?", None)).await;
    let session_id = first
        .iter()
        .find_map(|e| match e {
            SseEvent::SessionCreated { session_id, .. } => Some(session_id.clone()),
            _ => None,
        })
        .expect("session id");

    run_turn(&state, inputs("And what about bananas?", Some(session_id.clone()))).await;
    // Two full turns = 4 non-summary messages: the threshold fired.
    let summary = state.docstore.latest_summary(&session_id).await.unwrap();
    assert!(summary.is_some(), "no summary after the threshold was reached");

    run_turn(&state, inputs("What fruit mixes both colors?", Some(session_id.clone()))).await;

    // Exactly one summary exists and fewer than threshold messages follow it.
    let summary = state.docstore.latest_summary(&session_id).await.unwrap().unwrap();
    let after = state
        .docstore
        .count_non_summary_after(&session_id, summary.created_at)
        .await
        .unwrap();
    assert!(after < 4);

    // The loaded history is the summary plus only the turns after it.
    let history = state.history.load(&session_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, "system");
    assert!(history[0].content.starts_with("[history summary]"));
    assert_eq!(history[1].role, "user");
    assert!(history[1].content.contains("mixes both colors"));
    assert_eq!(history[2].role, "assistant");
}

#[tokio::test]
async fn empty_content_terminates_with_an_error_event() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: unused");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;

    let events = run_turn(&state, inputs("   ", None)).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], SseEvent::Error { .. }));
}

#[tokio::test]
async fn every_turn_ends_with_exactly_one_terminal_event() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: a plain answer");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;

    let events = run_turn(&state, inputs("Just answer me plainly please", None)).await;
    let terminal_count = events
        .iter()
        .filter(|e| matches!(e, SseEvent::Done { .. } | SseEvent::Error { .. }))
        .count();
    assert_eq!(terminal_count, 1);
    assert!(matches!(events.last(), Some(SseEvent::Done { .. })));
}
