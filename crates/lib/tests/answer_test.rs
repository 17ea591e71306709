//! # Answerer Integration Tests
//!
//! Full pipeline with a mocked embedding endpoint and a programmable chat
//! provider: event ordering, source enrichment (junction, legacy fallback,
//! stub), URL discrimination, cancellation, stream failure, and deadlines.

use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use pressrag::answer::{AnswerOptions, Answerer};
use pressrag::biblio::BiblioStore;
use pressrag::config::{EmbeddingConfig, RetrievalConfig};
use pressrag::providers::ai::EmbeddingClient;
use pressrag::search::Retriever;
use pressrag::types::{ChatEvent, DocumentType, PageRef};
use pressrag_test_utils::{embedding_blob, mock::FixedEmbeddingResponder, MockAiProvider, TestSetup};
use turso::params;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

mod common;
use common::setup_tracing;

const DIMENSION: usize = 4;
const QUERY_VECTOR: [f32; 4] = [1.0, 0.0, 0.0, 0.0];

struct Harness {
    setup: TestSetup,
    _server: MockServer,
    mock_ai: MockAiProvider,
    answerer: Answerer,
}

async fn harness() -> Result<Harness> {
    let setup = TestSetup::new().await?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FixedEmbeddingResponder::new(QUERY_VECTOR.to_vec()))
        .mount(&server)
        .await;

    let client = EmbeddingClient::new(&EmbeddingConfig {
        api_url: format!("{}/v1/embeddings", server.uri()),
        model_name: "test-embed".to_string(),
        api_key: None,
        dimension: DIMENSION,
        max_batch: 16,
        max_concurrency: 2,
    })?;
    let retriever = Retriever::new(&setup.provider, client, RetrievalConfig::default());
    let biblio = BiblioStore::from_database(setup.db.clone());

    let mock_ai = MockAiProvider::new();
    mock_ai.set_stream_tokens(&["Subfiles ", "hold ", "records."]);

    let answerer = Answerer::new(retriever, Box::new(mock_ai.clone()), biblio);
    Ok(Harness {
        setup,
        _server: server,
        mock_ai,
        answerer,
    })
}

async fn insert_chunk(
    setup: &TestSetup,
    filename: &str,
    page: i64,
    angle: f32,
) -> Result<()> {
    let conn = setup.db.connect()?;
    let blob = embedding_blob(&[1.0, angle, 0.0, 0.0]);
    conn.execute(
        "INSERT INTO chunks (filename, content, page_number, chunk_index, embedding, metadata, created_at)
         VALUES (?, ?, ?, 0, ?, ?, ?)",
        params![
            filename,
            format!("content from {filename}"),
            page,
            blob.as_slice(),
            r#"{"type":"text","language":null,"ocr":false}"#,
            "2026-01-01T00:00:00Z"
        ],
    )
    .await?;
    Ok(())
}

/// Seeds the four enrichment cases: junction-backed book, junction-backed
/// article, legacy-only book, and an orphan chunk with no book row.
async fn seed_corpus(harness: &Harness) -> Result<()> {
    let conn = harness.setup.db.connect()?;
    conn.execute(
        "INSERT INTO books (filename, title, document_type, mc_press_url, author)
         VALUES ('book1.pdf', 'Subfiles in RPG', 'book', 'https://mcpress.example/b1', 'Jerry Fottral')",
        (),
    )
    .await?;
    conn.execute(
        "INSERT INTO books (filename, title, document_type, article_url)
         VALUES ('art1.pdf', 'Cost Savings with DB2', 'article', 'https://www.mcpressonline.com/a1')",
        (),
    )
    .await?;
    conn.execute(
        "INSERT INTO books (filename, title, author) VALUES ('legacy.pdf', 'Old Book', 'Old Timer')",
        (),
    )
    .await?;

    let store = BiblioStore::from_database(harness.setup.db.clone());
    let book1 = store.enrich("book1.pdf").await?.expect("book1").book_id;
    let art1 = store.enrich("art1.pdf").await?.expect("art1").book_id;
    let jerry = store
        .get_or_create_author("Jerry Fottral", Some("https://fottral.example"))
        .await?;
    let alice = store.get_or_create_author("Alice Johnson", None).await?;
    store.add_author_to_document(book1, jerry, 0).await?;
    store.add_author_to_document(art1, alice, 0).await?;

    insert_chunk(&harness.setup, "book1.pdf", 9, 0.02).await?;
    insert_chunk(&harness.setup, "art1.pdf", 1, 0.04).await?;
    insert_chunk(&harness.setup, "legacy.pdf", 3, 0.06).await?;
    insert_chunk(&harness.setup, "orphan.pdf", 2, 0.08).await?;
    Ok(())
}

async fn collect_events(harness: &Harness, question: &str) -> Vec<ChatEvent> {
    let mut stream = harness
        .answerer
        .answer(question, AnswerOptions::default());
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn tokens_stream_in_order_then_done_with_enriched_sources() -> Result<()> {
    setup_tracing();
    let harness = harness().await?;
    seed_corpus(&harness).await?;

    let events = collect_events(&harness, "Tell me about these documents").await;

    let tokens: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Token { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens.join(""), "Subfiles hold records.");

    // Exactly one terminal event, and it is `done`.
    let ChatEvent::Done { sources, timestamp } = events.last().expect("terminal event") else {
        panic!("expected a done event, got {:?}", events.last());
    };
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Error { .. })));
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    assert_eq!(sources.len(), 4);

    let book1 = sources.iter().find(|s| s.filename == "book1.pdf").unwrap();
    assert_eq!(book1.mc_press_url, "https://mcpress.example/b1");
    assert_eq!(book1.article_url, None);
    assert_eq!(book1.document_type, DocumentType::Book);
    assert_eq!(book1.author, "Jerry Fottral");
    assert_eq!(book1.authors.len(), 1);
    assert!(book1.authors[0].id.is_some());
    assert_eq!(
        book1.authors[0].site_url.as_deref(),
        Some("https://fottral.example")
    );
    assert_eq!(book1.page, PageRef::Number(9));

    let art1 = sources.iter().find(|s| s.filename == "art1.pdf").unwrap();
    assert_eq!(
        art1.article_url.as_deref(),
        Some("https://www.mcpressonline.com/a1")
    );
    assert_eq!(art1.mc_press_url, "");
    assert_eq!(art1.document_type, DocumentType::Article);

    let legacy = sources.iter().find(|s| s.filename == "legacy.pdf").unwrap();
    assert_eq!(legacy.author, "Old Timer");
    assert_eq!(legacy.authors.len(), 1);
    assert!(legacy.authors[0].id.is_none());

    let orphan = sources.iter().find(|s| s.filename == "orphan.pdf").unwrap();
    assert_eq!(orphan.author, "Unknown");
    assert!(orphan.authors.is_empty());
    assert_eq!(orphan.document_type, DocumentType::Book);
    assert_eq!(orphan.mc_press_url, "");
    assert_eq!(orphan.article_url, None);
    Ok(())
}

#[tokio::test]
async fn dropping_the_stream_cancels_token_emission() -> Result<()> {
    setup_tracing();
    let harness = harness().await?;
    seed_corpus(&harness).await?;

    let many_tokens: Vec<String> = (0..20).map(|i| format!("token{i} ")).collect();
    let token_refs: Vec<&str> = many_tokens.iter().map(|s| s.as_str()).collect();
    harness.mock_ai.set_stream_tokens(&token_refs);
    harness.mock_ai.set_stream_delay(Duration::from_millis(30));

    let mut stream = harness
        .answerer
        .answer("Tell me about these documents", AnswerOptions::default());

    for _ in 0..5 {
        let event = stream.next().await.expect("expected a token");
        assert!(matches!(event, ChatEvent::Token { .. }));
    }
    drop(stream);

    // Give the producer time to notice the closed channel.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(
        harness.mock_ai.tokens_yielded() < 20,
        "token emission should stop promptly after cancellation, yielded {}",
        harness.mock_ai.tokens_yielded()
    );
    Ok(())
}

#[tokio::test]
async fn mid_stream_failure_emits_single_error_and_no_done() -> Result<()> {
    setup_tracing();
    let harness = harness().await?;
    seed_corpus(&harness).await?;

    harness
        .mock_ai
        .set_stream_tokens(&["one ", "two ", "three ", "four "]);
    harness.mock_ai.fail_stream_after(2);

    let events = collect_events(&harness, "Tell me about these documents").await;

    let token_count = events
        .iter()
        .filter(|e| matches!(e, ChatEvent::Token { .. }))
        .count();
    assert_eq!(token_count, 2);
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Done { .. })));
    let ChatEvent::Error { kind, .. } = events.last().expect("terminal event") else {
        panic!("expected an error event");
    };
    assert_eq!(kind, "LLMStreamAborted");
    Ok(())
}

#[tokio::test]
async fn retrieval_failure_emits_error_event() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let client = EmbeddingClient::new(&EmbeddingConfig {
        api_url: "http://127.0.0.1:1/v1/embeddings".to_string(),
        model_name: "test-embed".to_string(),
        api_key: None,
        dimension: DIMENSION,
        max_batch: 16,
        max_concurrency: 2,
    })?;
    let retriever = Retriever::new(&setup.provider, client, RetrievalConfig::default());
    let biblio = BiblioStore::from_database(setup.db.clone());
    let answerer = Answerer::new(retriever, Box::new(MockAiProvider::new()), biblio);

    let mut stream = answerer.answer("anything", AnswerOptions::default());
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }

    assert_eq!(events.len(), 1);
    let ChatEvent::Error { kind, .. } = &events[0] else {
        panic!("expected an error event");
    };
    assert_eq!(kind, "RetrieveFailed");
    Ok(())
}

#[tokio::test]
async fn deadline_expiry_mid_stream_emits_llm_timeout() -> Result<()> {
    setup_tracing();
    let harness = harness().await?;
    seed_corpus(&harness).await?;

    harness
        .mock_ai
        .set_stream_tokens(&["one ", "two ", "three ", "four ", "five "]);
    harness.mock_ai.set_stream_delay(Duration::from_millis(200));

    let mut stream = harness.answerer.answer(
        "Tell me about these documents",
        AnswerOptions {
            deadline: Some(Duration::from_millis(350)),
        },
    );
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }

    let ChatEvent::Error { kind, .. } = events.last().expect("terminal event") else {
        panic!("expected an error event, got {:?}", events.last());
    };
    assert_eq!(kind, "LLMTimeout");
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Done { .. })));
    Ok(())
}

#[tokio::test]
async fn broken_bibliographic_store_degrades_to_stubs_not_errors() -> Result<()> {
    setup_tracing();
    let harness = harness().await?;
    seed_corpus(&harness).await?;

    // Sabotage enrichment entirely; retrieval and generation still work.
    let conn = harness.setup.db.connect()?;
    conn.execute("DROP TABLE books", ()).await?;

    let events = collect_events(&harness, "Tell me about these documents").await;

    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Error { .. })));
    let ChatEvent::Done { sources, .. } = events.last().expect("terminal event") else {
        panic!("expected a done event");
    };
    assert_eq!(sources.len(), 4);
    for source in sources {
        assert_eq!(source.author, "Unknown");
        assert!(source.authors.is_empty());
        assert_eq!(source.document_type, DocumentType::Book);
    }
    Ok(())
}
