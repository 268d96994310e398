// tests/ingest_flow_test.rs
// Ingest-then-retrieve flows: lifecycle, permissions, delete cascade

mod common;

use common::{ScriptedLlm, test_config, test_state, wait_for_terminal};
use trellis::retrieval::SearchOptions;
use trellis::store::{DocStatus, Permission};

#[tokio::test]
async fn ingest_then_retrieve_returns_the_uploaded_document() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: ok");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;
    state.start_ingestion().await.unwrap();

    let doc = state
        .upload_text(
            "fruit.txt",
            "Apples are red. Bananas are yellow.",
            Permission::Public,
        )
        .await
        .unwrap();
    let done = wait_for_terminal(&state, &doc.uuid).await;

    assert_eq!(done.status, DocStatus::Done);
    let chunks_count = done.extra["chunks_count"].as_u64().unwrap();
    assert!(chunks_count > 0);
    assert_eq!(done.page_count as u64, chunks_count);

    // Indexed vector count matches the recorded chunk count.
    let vector_count = state
        .vector
        .count_by_metadata(
            &state.config.vector.docs_collection,
            "document_uuid",
            &doc.uuid,
        )
        .await
        .unwrap();
    assert_eq!(vector_count as u64, chunks_count);

    let results = state
        .retriever
        .search(
            "color of bananas",
            SearchOptions {
                top_k: 1,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].text.contains("Bananas are yellow"));
    assert_eq!(results[0].document_uuid(), Some(doc.uuid.as_str()));

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn admin_only_documents_are_invisible_to_public_users() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: ok");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;
    state.start_ingestion().await.unwrap();

    let doc = state
        .upload_text(
            "internal.txt",
            "Apples are red. Bananas are yellow.",
            Permission::AdminOnly,
        )
        .await
        .unwrap();
    let done = wait_for_terminal(&state, &doc.uuid).await;
    assert_eq!(done.status, DocStatus::Done);

    let public_results = state
        .retriever
        .search(
            "color of bananas",
            SearchOptions {
                top_k: 3,
                user_permission: Permission::Public,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(
        public_results.is_empty(),
        "public search leaked admin-only chunks"
    );

    let admin_results = state
        .retriever
        .search(
            "color of bananas",
            SearchOptions {
                top_k: 3,
                user_permission: Permission::AdminOnly,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(!admin_results.is_empty());

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn delete_cascades_to_vectors_and_row() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: ok");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;
    state.start_ingestion().await.unwrap();

    let doc = state
        .upload_text("doomed.txt", "Some content destined for deletion.", Permission::Public)
        .await
        .unwrap();
    wait_for_terminal(&state, &doc.uuid).await;

    state.delete_document(&doc.uuid).await.unwrap();

    // Deletion is processed by the same worker pool; poll for the cascade.
    for _ in 0..100 {
        let remaining = state
            .vector
            .count_by_metadata(
                &state.config.vector.docs_collection,
                "document_uuid",
                &doc.uuid,
            )
            .await
            .unwrap();
        let row = state.docstore.get_document(&doc.uuid).await.unwrap();
        if remaining == 0 && row.is_none() {
            state.shutdown().await.unwrap();
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("delete cascade never completed");
}

#[tokio::test]
async fn empty_documents_fail_without_vectors() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: ok");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;
    state.start_ingestion().await.unwrap();

    let doc = state
        .upload_text("empty.txt", "   \n  ", Permission::Public)
        .await
        .unwrap();
    let done = wait_for_terminal(&state, &doc.uuid).await;

    assert_eq!(done.status, DocStatus::Failed);
    let vector_count = state
        .vector
        .count_by_metadata(
            &state.config.vector.docs_collection,
            "document_uuid",
            &doc.uuid,
        )
        .await
        .unwrap();
    assert_eq!(vector_count, 0);

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn file_uploads_are_extracted_and_indexed() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: ok");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;
    state.start_ingestion().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fruit.txt");
    std::fs::write(&path, "Grapes are purple. Kiwis are green.").unwrap();

    let doc = state
        .upload_file(
            "fruit.txt",
            path.to_str().unwrap(),
            35,
            Permission::Public,
        )
        .await
        .unwrap();
    let done = wait_for_terminal(&state, &doc.uuid).await;
    assert_eq!(done.status, DocStatus::Done);

    let results = state
        .retriever
        .search(
            "color of kiwis",
            SearchOptions {
                top_k: 1,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].text.contains("Kiwis are green"));
    // File-task chunks carry the upload's filename as provenance.
    assert_eq!(results[0].filename(), "fruit.txt");

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn unsupported_file_types_fail_the_document() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: ok");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;
    state.start_ingestion().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slides.pptx");
    std::fs::write(&path, b"binary-ish bytes").unwrap();

    let doc = state
        .upload_file("slides.pptx", path.to_str().unwrap(), 16, Permission::Public)
        .await
        .unwrap();
    let done = wait_for_terminal(&state, &doc.uuid).await;
    assert_eq!(done.status, DocStatus::Failed);

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn redelivered_tasks_do_not_duplicate_chunks() {
    let chat = ScriptedLlm::new(vec![], "Final Answer: ok");
    let utility = ScriptedLlm::new(vec![], "NO");
    let state = test_state(test_config(), chat, utility).await;
    state.start_ingestion().await.unwrap();

    let content = "Apples are red. Bananas are yellow.";
    let doc = state
        .upload_text("fruit.txt", content, Permission::Public)
        .await
        .unwrap();
    let done = wait_for_terminal(&state, &doc.uuid).await;
    let chunks_count = done.extra["chunks_count"].as_u64().unwrap();

    // Adversarial redelivery of the same task straight to the handler.
    state
        .pipeline
        .handle_task(trellis::bus::IngestTask::text(&doc.uuid, content, 0))
        .await;

    let vector_count = state
        .vector
        .count_by_metadata(
            &state.config.vector.docs_collection,
            "document_uuid",
            &doc.uuid,
        )
        .await
        .unwrap();
    assert_eq!(vector_count as u64, chunks_count, "redelivery duplicated chunks");

    let doc_after = state.docstore.get_document(&doc.uuid).await.unwrap().unwrap();
    assert_eq!(doc_after.status, DocStatus::Done);

    state.shutdown().await.unwrap();
}
