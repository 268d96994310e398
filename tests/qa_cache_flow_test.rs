// tests/qa_cache_flow_test.rs
// Similar-QA cache: probe idempotence, feedback rules, eviction

mod common;

use common::{ScriptedLlm, test_config, test_state};
use trellis::qa::{Feedback, SaveChain};

async fn seeded_state() -> (trellis::AppState, String) {
    let chat = ScriptedLlm::new(vec![], "Final Answer: ok");
    let utility = ScriptedLlm::new(vec![], "YES");
    let state = test_state(test_config(), chat, utility).await;

    let chain_id = state
        .trace
        .save_chain(SaveChain {
            session_id: "s-1",
            question: "What is retrieval augmented generation?",
            answer: "It grounds model answers in retrieved documents.",
            thoughts: &["I should search the knowledge base.".to_string()],
            actions: &["knowledge_search(rag)".to_string()],
            observations: &["found passages".to_string()],
            documents_used: vec![trellis::store::DocumentRef {
                uuid: "d-1".into(),
                name: "rag.txt".into(),
            }],
            user_id: Some("u-1"),
            message_id: None,
            model_name: Some("scripted"),
            should_cache: true,
        })
        .await
        .unwrap();

    (state, chain_id)
}

#[tokio::test]
async fn cached_chains_are_found_and_probes_are_idempotent() {
    let (state, chain_id) = seeded_state().await;

    let chain = state.docstore.get_thought_chain(&chain_id).await.unwrap().unwrap();
    assert!(chain.is_cached);
    assert!(chain.qa_vector_id.is_some());

    let first = state
        .cache
        .find_similar("What is retrieval augmented generation?", false)
        .await
        .expect("cache hit");
    assert_eq!(first.thought_chain_id, chain_id);
    assert!(first.answer.contains("grounds model answers"));
    assert_eq!(first.documents.len(), 1);

    // Unchanged store: the second probe picks the same entry.
    let second = state
        .cache
        .find_similar("What is retrieval augmented generation?", false)
        .await
        .expect("cache hit");
    assert_eq!(second.thought_chain_id, first.thought_chain_id);

    // skip_cache bypasses the probe entirely.
    assert!(
        state
            .cache
            .find_similar("What is retrieval augmented generation?", true)
            .await
            .is_none()
    );
}

#[tokio::test]
async fn feedback_counts_follow_the_vote_rules() {
    let (state, chain_id) = seeded_state().await;

    // First like increases like_count by exactly 1.
    let outcome = state
        .cache
        .update_feedback(&chain_id, "u-1", Feedback::Like)
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.like_count, 1);
    assert_eq!(outcome.dislike_count, 0);

    // An identical repeat is rejected and counts stay put.
    let repeat = state
        .cache
        .update_feedback(&chain_id, "u-1", Feedback::Like)
        .await
        .unwrap();
    assert!(!repeat.success);
    assert_eq!(repeat.like_count, 1);

    // Switching to dislike undoes the like first.
    let switched = state
        .cache
        .update_feedback(&chain_id, "u-1", Feedback::Dislike)
        .await
        .unwrap();
    assert!(switched.success);
    assert_eq!(switched.like_count, 0);
    assert_eq!(switched.dislike_count, 1);

    // Counters agree with the recorded vote map.
    let chain = state.docstore.get_thought_chain(&chain_id).await.unwrap().unwrap();
    let likes = chain.user_feedbacks.values().filter(|v| *v == "like").count() as i64;
    let dislikes = chain.user_feedbacks.values().filter(|v| *v == "dislike").count() as i64;
    assert_eq!(chain.like_count, likes);
    assert_eq!(chain.dislike_count, dislikes);
}

#[tokio::test]
async fn three_net_dislikes_evict_the_cache_entry() {
    let (state, chain_id) = seeded_state().await;

    for user in ["u-1", "u-2", "u-3"] {
        let outcome = state
            .cache
            .update_feedback(&chain_id, user, Feedback::Dislike)
            .await
            .unwrap();
        assert!(outcome.success);
    }

    let chain = state.docstore.get_thought_chain(&chain_id).await.unwrap().unwrap();
    assert_eq!(chain.dislike_count, 3);
    assert!(!chain.is_cached);
    assert!(chain.qa_vector_id.is_none());

    // The vector entry is gone too.
    let remaining = state
        .vector
        .count_by_metadata(
            &state.config.vector.qa_collection,
            "thought_chain_id",
            &chain_id,
        )
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    // And the probe now misses.
    assert!(
        state
            .cache
            .find_similar("What is retrieval augmented generation?", false)
            .await
            .is_none()
    );
}

#[tokio::test]
async fn judge_rejection_keeps_the_chain_uncached() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: ok");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;

    let chain_id = state
        .trace
        .save_chain(SaveChain {
            session_id: "s-1",
            question: "hello there",
            answer: "hi",
            thoughts: &[],
            actions: &[],
            observations: &[],
            documents_used: vec![],
            user_id: Some("u-1"),
            message_id: None,
            model_name: None,
            should_cache: false,
        })
        .await
        .unwrap();

    let chain = state.docstore.get_thought_chain(&chain_id).await.unwrap().unwrap();
    assert!(!chain.is_cached);
    assert!(chain.qa_vector_id.is_none());
    assert_eq!(
        state
            .vector
            .count_by_metadata(
                &state.config.vector.qa_collection,
                "thought_chain_id",
                &chain_id
            )
            .await
            .unwrap(),
        0
    );
}
