//! # Retriever Integration Tests
//!
//! The corpus vectors are inserted directly so each test controls the
//! cosine geometry exactly; only the query embedding goes through the
//! mocked HTTP endpoint.

use anyhow::Result;
use pressrag::config::{EmbeddingConfig, RetrievalConfig};
use pressrag::errors::RagError;
use pressrag::providers::ai::EmbeddingClient;
use pressrag::search::Retriever;
use pressrag_test_utils::{embedding_blob, mock::FixedEmbeddingResponder, TestSetup};
use turso::params;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

mod common;
use common::setup_tracing;

const DIMENSION: usize = 4;

/// The query always embeds to the unit x-axis; corpus vectors choose their
/// own angle against it.
const QUERY_VECTOR: [f32; 4] = [1.0, 0.0, 0.0, 0.0];

fn embedding_client(server_uri: &str) -> EmbeddingClient {
    EmbeddingClient::new(&EmbeddingConfig {
        api_url: format!("{server_uri}/v1/embeddings"),
        model_name: "test-embed".to_string(),
        api_key: None,
        dimension: DIMENSION,
        max_batch: 16,
        max_concurrency: 2,
    })
    .expect("embedding client")
}

async fn query_embedding_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FixedEmbeddingResponder::new(QUERY_VECTOR.to_vec()))
        .mount(&server)
        .await;
    server
}

async fn insert_chunk(
    setup: &TestSetup,
    filename: &str,
    page: i64,
    index: i64,
    content: &str,
    vector: &[f32],
) -> Result<()> {
    let conn = setup.db.connect()?;
    let blob = embedding_blob(vector);
    conn.execute(
        "INSERT INTO chunks (filename, content, page_number, chunk_index, embedding, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            filename,
            content,
            page,
            index,
            blob.as_slice(),
            r#"{"type":"text","language":null,"ocr":false}"#,
            "2026-01-01T00:00:00Z"
        ],
    )
    .await?;
    Ok(())
}

fn retriever(setup: &TestSetup, server_uri: &str) -> Retriever {
    Retriever::new(
        &setup.provider,
        embedding_client(server_uri),
        RetrievalConfig::default(),
    )
}

#[tokio::test]
async fn close_chunks_return_in_ascending_distance_order() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let server = query_embedding_server().await;

    // Three close chunks at increasing angles, then unrelated noise.
    insert_chunk(&setup, "db2.pdf", 1, 0, "DB2 saves money", &[1.0, 0.05, 0.0, 0.0]).await?;
    insert_chunk(&setup, "db2.pdf", 2, 1, "DB2 cost analysis", &[1.0, 0.10, 0.0, 0.0]).await?;
    insert_chunk(&setup, "tco.pdf", 4, 0, "Total cost of ownership", &[1.0, 0.20, 0.0, 0.0])
        .await?;
    for i in 0..40 {
        insert_chunk(
            &setup,
            "noise.pdf",
            10 + i,
            i,
            "unrelated content",
            &[0.0, 1.0, 0.1, 0.0],
        )
        .await?;
    }

    let results = retriever(&setup, &server.uri())
        .retrieve_with("DB2 cost savings", 30, 12)
        .await?;

    assert_eq!(results.len(), 3);
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert_eq!(results[0].content, "DB2 saves money");
    assert_eq!(results[2].content, "Total cost of ownership");
    assert!(results.iter().all(|r| r.distance < 0.1));
    Ok(())
}

#[tokio::test]
async fn results_are_capped_at_max_sources() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let server = query_embedding_server().await;

    for i in 0..20i64 {
        insert_chunk(
            &setup,
            &format!("doc{i}.pdf"),
            1,
            0,
            "close match",
            &[1.0, 0.01 * (i + 1) as f32, 0.0, 0.0],
        )
        .await?;
    }

    let results = retriever(&setup, &server.uri())
        .retrieve_with("DB2 cost savings", 30, 12)
        .await?;
    assert_eq!(results.len(), 12);
    Ok(())
}

#[tokio::test]
async fn duplicates_on_one_page_collapse_to_best_ranked() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let server = query_embedding_server().await;

    insert_chunk(&setup, "db2.pdf", 1, 0, "better match", &[1.0, 0.05, 0.0, 0.0]).await?;
    insert_chunk(&setup, "db2.pdf", 1, 1, "worse match", &[1.0, 0.15, 0.0, 0.0]).await?;
    insert_chunk(&setup, "db2.pdf", 2, 2, "other page", &[1.0, 0.10, 0.0, 0.0]).await?;

    let results = retriever(&setup, &server.uri())
        .retrieve_with("DB2 cost savings", 30, 12)
        .await?;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].content, "better match");
    assert_eq!(results[1].content, "other page");
    Ok(())
}

#[tokio::test]
async fn ceiling_relaxes_to_satisfy_min_keep_but_never_past_hard_max() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let server = query_embedding_server().await;

    // cos distance ~0.55: admitted only after relaxation for a keyword
    // query whose base ceiling is tighter.
    for i in 0..3i64 {
        insert_chunk(
            &setup,
            &format!("mid{i}.pdf"),
            1,
            0,
            "mid-distance match",
            &[0.45, 0.893, 0.0, 0.0],
        )
        .await?;
    }
    // cos distance ~0.9: past the hard max, never admitted.
    insert_chunk(&setup, "far.pdf", 1, 0, "far match", &[0.1, 0.995, 0.0, 0.0]).await?;

    let results = retriever(&setup, &server.uri())
        .retrieve_with("DB2 cost savings", 30, 12)
        .await?;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.content == "mid-distance match"));
    assert!(results.iter().all(|r| r.distance <= 0.65));
    Ok(())
}

#[tokio::test]
async fn empty_corpus_returns_empty_not_error() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let server = query_embedding_server().await;

    let results = retriever(&setup, &server.uri())
        .retrieve_with("anything at all", 30, 12)
        .await?;
    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
async fn embedding_backend_failure_surfaces_as_retrieve_failed() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;

    // Nothing listens on this address.
    let err = retriever(&setup, "http://127.0.0.1:1")
        .retrieve_with("DB2 cost savings", 30, 12)
        .await
        .expect_err("unreachable embedding backend must fail retrieval");
    assert!(matches!(err, RagError::RetrieveFailed(_)));
    Ok(())
}
