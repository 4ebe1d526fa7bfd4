mod common;

use common::{
    conversation_about_databases, knowledge_with_decision, FakeExtraction, TestHarness,
};
use mnema::error::MnemaError;
use mnema::models::{IngestRequest, Message, SessionStatus};
use mnema::services::SessionService;
use tokio_util::sync::CancellationToken;

fn ingest_request(messages: Vec<Message>) -> IngestRequest {
    IngestRequest {
        source: "claude".to_string(),
        messages,
        conversation_id: None,
        append_only: false,
        session_id: None,
        auto_link_session: false,
    }
}

#[tokio::test]
async fn ingest_rejects_empty_messages() {
    let harness = TestHarness::new(FakeExtraction::default());
    let service = harness.ingest_service();

    let err = service
        .ingest("u1", &ingest_request(Vec::new()), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MnemaError::Validation(_)));

    let err = service
        .ingest(
            "u1",
            &ingest_request(vec![Message::user("   ")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MnemaError::Validation(_)));
}

#[tokio::test]
async fn ingest_persists_conversation_chunks_and_knowledge() {
    let harness = TestHarness::new(FakeExtraction::with_knowledge(knowledge_with_decision()));
    let service = harness.ingest_service();

    let outcome = service
        .ingest(
            "u1",
            &ingest_request(conversation_about_databases()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.chunks_created >= 1);
    assert_eq!(outcome.entities_extracted, 1);
    assert_eq!(outcome.relationships_created, 1);
    assert_eq!(outcome.facts_recorded, 1);
    assert_eq!(outcome.appended_messages, 0);

    use mnema::store::ConversationStore;
    let stored = harness
        .store
        .get_conversation("u1", &outcome.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.message_count, 3);
    assert!(stored.embedding.is_some());
    assert!(stored.has_decisions);
    assert!(stored.has_facts);
    assert_eq!(stored.session_status, SessionStatus::Standalone);

    use mnema::graph::GraphStore;
    let decisions = harness.graph.decision_edges("u1", 10).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].target, "PostgreSQL");
    assert_eq!(
        decisions[0].conversation_id.as_deref(),
        Some(outcome.conversation_id.as_str())
    );

    let facts = harness.graph.current_facts("u1", 10).await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].object, "Acme");
}

#[tokio::test]
async fn ingest_without_graph_still_stores_memory_layer() {
    let harness = TestHarness::new(FakeExtraction::with_knowledge(knowledge_with_decision()));
    let service = harness.ingest_service_without_graph();

    let outcome = service
        .ingest(
            "u1",
            &ingest_request(conversation_about_databases()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.chunks_created >= 1);
    assert_eq!(outcome.entities_extracted, 0);
    assert_eq!(outcome.relationships_created, 0);
    assert_eq!(outcome.facts_recorded, 0);

    use mnema::store::ConversationStore;
    let stored = harness
        .store
        .get_conversation("u1", &outcome.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.has_decisions);
    assert!(!stored.has_facts);
}

#[tokio::test]
async fn resending_full_transcript_is_idempotent() {
    let harness = TestHarness::new(FakeExtraction::default());
    let service = harness.ingest_service();
    let messages = conversation_about_databases();

    let first = service
        .ingest("u1", &ingest_request(messages.clone()), &CancellationToken::new())
        .await
        .unwrap();

    let mut resend = ingest_request(messages);
    resend.conversation_id = Some(first.conversation_id.clone());
    let second = service
        .ingest("u1", &resend, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(second.appended_messages, 0);
    assert_eq!(second.chunks_created, 0);
}

#[tokio::test]
async fn append_continues_chunk_indices() {
    let harness = TestHarness::new(FakeExtraction::default());
    let service = harness.ingest_service();
    let mut messages = conversation_about_databases();

    let first = service
        .ingest("u1", &ingest_request(messages.clone()), &CancellationToken::new())
        .await
        .unwrap();

    messages.push(Message::user(
        "One more thing: should I use connection pooling from the start?",
    ));
    messages.push(Message::assistant(
        "Yes. PgBouncer in transaction mode is the usual starting point.",
    ));

    let mut append = ingest_request(messages);
    append.conversation_id = Some(first.conversation_id.clone());
    let second = service
        .ingest("u1", &append, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.appended_messages, 2);
    assert!(second.chunks_created >= 1);

    use mnema::store::{ChunkStore, ConversationStore};
    let chunks = harness
        .store
        .chunks_by_conversation("u1", &first.conversation_id)
        .await
        .unwrap();
    let mut indices: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
    indices.sort_unstable();
    let expected: Vec<u32> = (0..chunks.len() as u32).collect();
    assert_eq!(indices, expected);

    let stored = harness
        .store
        .get_conversation("u1", &first.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.message_count, 5);
}

#[tokio::test]
async fn append_only_payload_carries_just_the_tail() {
    let harness = TestHarness::new(FakeExtraction::default());
    let service = harness.ingest_service();

    let first = service
        .ingest(
            "u1",
            &ingest_request(conversation_about_databases()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut append = ingest_request(vec![Message::user(
        "Also, what indexing strategy fits time series tables?",
    )]);
    append.conversation_id = Some(first.conversation_id.clone());
    append.append_only = true;

    let second = service
        .ingest("u1", &append, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.appended_messages, 1);

    use mnema::store::ConversationStore;
    let stored = harness
        .store
        .get_conversation("u1", &first.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.message_count, 4);
}

#[tokio::test]
async fn explicit_session_must_exist() {
    let harness = TestHarness::new(FakeExtraction::default());
    let service = harness.ingest_service();

    let mut request = ingest_request(conversation_about_databases());
    request.session_id = Some("missing-session".to_string());

    let err = service
        .ingest("u1", &request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MnemaError::NotFound(_)));
}

#[tokio::test]
async fn explicit_session_links_and_refreshes_membership() {
    let harness = TestHarness::new(FakeExtraction::default());
    let service = harness.ingest_service();
    let sessions = SessionService::new(
        harness.store.clone(),
        harness.embeddings.clone(),
        common::scoring_config(),
    );

    let session = sessions.create_session("u1", "Analytics project").await.unwrap();

    let mut request = ingest_request(conversation_about_databases());
    request.session_id = Some(session.id.clone());

    let outcome = service
        .ingest("u1", &request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.linked_session_id.as_deref(), Some(session.id.as_str()));

    use mnema::store::SessionStore;
    let refreshed = harness
        .store
        .get_session("u1", &session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.conversation_count, 1);
    assert!(refreshed.embedding.is_some());
    assert!(refreshed.last_activity.is_some());
}

#[tokio::test]
async fn near_identical_conversation_auto_links_when_requested() {
    let harness = TestHarness::new(FakeExtraction::default());
    let service = harness.ingest_service();
    let sessions = SessionService::new(
        harness.store.clone(),
        harness.embeddings.clone(),
        common::scoring_config(),
    );

    let session = sessions.create_session("u1", "Analytics project").await.unwrap();

    let mut seed = ingest_request(conversation_about_databases());
    seed.session_id = Some(session.id.clone());
    service
        .ingest("u1", &seed, &CancellationToken::new())
        .await
        .unwrap();

    let mut follow_up = ingest_request(conversation_about_databases());
    follow_up.auto_link_session = true;
    let outcome = service
        .ingest("u1", &follow_up, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.linked_session_id.as_deref(),
        Some(session.id.as_str()),
        "identical content should clear the auto-link threshold"
    );
    let suggestion = outcome.session_suggestion.expect("analysis should run");
    assert!(suggestion.auto_link);
    assert!(suggestion.confidence >= 0.85);

    use mnema::store::SuggestionStore;
    let records = harness
        .store
        .suggestions_for_conversation(&outcome.conversation_id)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].accepted, Some(true));
}

#[tokio::test]
async fn suggestion_without_auto_link_leaves_conversation_standalone() {
    let harness = TestHarness::new(FakeExtraction::default());
    let service = harness.ingest_service();
    let sessions = SessionService::new(
        harness.store.clone(),
        harness.embeddings.clone(),
        common::scoring_config(),
    );

    let session = sessions.create_session("u1", "Analytics project").await.unwrap();
    let mut seed = ingest_request(conversation_about_databases());
    seed.session_id = Some(session.id.clone());
    service
        .ingest("u1", &seed, &CancellationToken::new())
        .await
        .unwrap();

    // auto_link_session defaults to false: suggest, never link.
    let outcome = service
        .ingest(
            "u1",
            &ingest_request(conversation_about_databases()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.linked_session_id.is_none());
    assert!(outcome.session_suggestion.is_some());

    use mnema::store::ConversationStore;
    let stored = harness
        .store
        .get_conversation("u1", &outcome.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.session_status, SessionStatus::Standalone);
}

#[tokio::test]
async fn cancelled_token_aborts_the_pipeline() {
    let harness = TestHarness::new(FakeExtraction::default());
    let service = harness.ingest_service();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = service
        .ingest("u1", &ingest_request(conversation_about_databases()), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, MnemaError::Cancelled));
}
