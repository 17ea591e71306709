//! # Embeddings Client
//!
//! Generates dense vector embeddings by calling an external,
//! OpenAI-compatible embeddings API. Inputs are windowed into batches that
//! fit the model's input limits, calls run under a bounded concurrency
//! gate, transient failures retry with exponential backoff, and every
//! returned vector is checked against the declared dimension.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::errors::AiError;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);

// --- OpenAI-compatible request and response structures ---

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// A shared client for the embedding backend.
///
/// One instance is created at process startup and injected into the
/// indexer and retriever; cloning shares the HTTP client and the
/// concurrency gate.
#[derive(Clone, Debug)]
pub struct EmbeddingClient {
    client: ReqwestClient,
    api_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    max_batch: usize,
    gate: Arc<Semaphore>,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, AiError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(AiError::ClientBuild)?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            model: config.model_name.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
            max_batch: config.max_batch.max(1),
            gate: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
        })
    }

    /// The declared vector dimension every embedding must match.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embeds a single text, typically a user query.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, AiError> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| AiError::Api("embeddings API returned no vectors".to_string()))
    }

    /// Embeds a batch of texts, preserving input order.
    ///
    /// Inputs are windowed to the configured batch size; each window is one
    /// API call.
    pub async fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(inputs.len());
        for window in inputs.chunks(self.max_batch) {
            let vectors = self.request_with_retry(window).await?;
            if vectors.len() != window.len() {
                return Err(AiError::Api(format!(
                    "embeddings API returned {} vectors for {} inputs",
                    vectors.len(),
                    window.len()
                )));
            }
            for vector in &vectors {
                if vector.len() != self.dimension {
                    return Err(AiError::DimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
            }
            all.extend(vectors);
        }
        Ok(all)
    }

    async fn request_with_retry(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AiError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| AiError::Api("embedding concurrency gate closed".to_string()))?;

        let mut attempt = 0;
        loop {
            match self.request(inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if attempt + 1 < MAX_ATTEMPTS && is_transient(&err) => {
                    let delay = BACKOFF_BASE * 2u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "embedding request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AiError> {
        let request_body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        debug!(batch = inputs.len(), "--> Sending batch to embeddings API");

        let mut request_builder = self.client.post(&self.api_url).json(&request_body);
        if let Some(key) = &self.api_key {
            request_builder = request_builder.bearer_auth(key);
        }

        let response = request_builder.send().await.map_err(AiError::Request)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AiError::Api(error_text));
        }

        let embedding_response: EmbeddingResponse =
            response.json().await.map_err(AiError::Deserialization)?;

        Ok(embedding_response
            .data
            .into_iter()
            .map(|d| d.embedding)
            .collect())
    }
}

/// Transport and backend errors are worth retrying; a dimension mismatch or
/// an unparseable body will not improve on a second attempt.
fn is_transient(err: &AiError) -> bool {
    matches!(err, AiError::Request(_) | AiError::Api(_))
}
