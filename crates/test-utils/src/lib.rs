//! # Shared Test Utilities
//!
//! Helpers used across the workspace's integration tests: an isolated
//! in-memory database with the full schema, a programmable mock AI
//! provider (blocking and streaming), a deterministic embedding-endpoint
//! responder for wiremock, and PDF fixture generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use pressrag::errors::AiError;
use pressrag::providers::ai::{AiProvider, TokenStream};
use pressrag::providers::db::sqlite::SqliteProvider;
use turso::Database;

// --- Test Setup ---

/// A helper struct to manage database creation for each test.
pub struct TestSetup {
    pub provider: SqliteProvider,
    pub db: Database,
}

impl TestSetup {
    /// Creates a new, isolated in-memory database and initializes the
    /// schema.
    pub async fn new() -> Result<Self> {
        let provider = SqliteProvider::new(":memory:").await?;
        provider.initialize_schema().await?;
        let db = provider.db.clone();
        Ok(Self { provider, db })
    }
}

/// Serializes an embedding the way the indexer stores it: little-endian
/// `f32` bytes, suitable for inserting test chunks directly.
pub fn embedding_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

// --- Mock AI Provider ---

/// A programmable stand-in for the chat provider.
///
/// Blocking responses are keyed by a substring of the system prompt, as in
/// production the system prompt identifies the task. Streaming responses
/// replay a programmed token script, optionally with a delay per token and
/// an error injected after N tokens.
#[derive(Clone, Debug)]
pub struct MockAiProvider {
    responses: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    stream_tokens: Arc<Mutex<Vec<String>>>,
    stream_delay: Arc<Mutex<Option<Duration>>>,
    fail_after: Arc<Mutex<Option<usize>>>,
    tokens_yielded: Arc<AtomicUsize>,
}

impl MockAiProvider {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            stream_tokens: Arc::new(Mutex::new(Vec::new())),
            stream_delay: Arc::new(Mutex::new(None)),
            fail_after: Arc::new(Mutex::new(None)),
            tokens_yielded: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pre-programs a blocking response for a specific prompt.
    /// The key should be a unique substring of the system prompt.
    pub fn add_response(&self, key: &str, response: &str) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(key.to_string(), response.to_string());
    }

    /// Programs the token script replayed by `generate_stream`.
    pub fn set_stream_tokens(&self, tokens: &[&str]) {
        *self.stream_tokens.lock().unwrap() =
            tokens.iter().map(|t| t.to_string()).collect();
    }

    /// Inserts a pause before each streamed token.
    pub fn set_stream_delay(&self, delay: Duration) {
        *self.stream_delay.lock().unwrap() = Some(delay);
    }

    /// Makes the stream fail with an API error after yielding N tokens.
    pub fn fail_stream_after(&self, tokens: usize) {
        *self.fail_after.lock().unwrap() = Some(tokens);
    }

    /// Retrieves the recorded calls for assertion.
    pub fn get_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// How many tokens streams have yielded so far, across all calls.
    /// Used to assert that cancellation stopped emission promptly.
    pub fn tokens_yielded(&self) -> usize {
        self.tokens_yielded.load(Ordering::SeqCst)
    }
}

impl Default for MockAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, AiError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((system_prompt.to_string(), user_prompt.to_string()));

        let responses = self.responses.lock().unwrap();
        for (key, response) in responses.iter() {
            if system_prompt.contains(key) {
                return Ok(response.clone());
            }
        }

        Err(AiError::Api(format!(
            "MockAiProvider: No response programmed for system prompt. Got: '{system_prompt}'"
        )))
    }

    async fn generate_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<TokenStream, AiError> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.push((system_prompt.to_string(), user_prompt.to_string()));
        }

        let tokens = self.stream_tokens.lock().unwrap().clone();
        let delay = *self.stream_delay.lock().unwrap();
        let fail_after = *self.fail_after.lock().unwrap();
        let yielded = Arc::clone(&self.tokens_yielded);

        let items: Vec<Result<String, AiError>> = tokens
            .into_iter()
            .enumerate()
            .map(|(i, token)| {
                if fail_after.is_some_and(|n| i >= n) {
                    Err(AiError::Api("mock stream failure".to_string()))
                } else {
                    Ok(token)
                }
            })
            .collect();

        let stream = futures::stream::iter(items).then(move |item| {
            let yielded = Arc::clone(&yielded);
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if item.is_ok() {
                    yielded.fetch_add(1, Ordering::SeqCst);
                }
                item
            }
        });

        Ok(Box::pin(stream))
    }
}

// --- Wiremock responders ---

pub mod mock {
    use serde_json::json;
    use wiremock::{Request, Respond, ResponseTemplate};

    /// Responds to an OpenAI-compatible embeddings request with one copy of
    /// a fixed vector per input, so tests control query geometry while
    /// corpus vectors are inserted directly.
    pub struct FixedEmbeddingResponder {
        vector: Vec<f32>,
    }

    impl FixedEmbeddingResponder {
        pub fn new(vector: Vec<f32>) -> Self {
            Self { vector }
        }

        /// A uniform vector of the given dimension, for tests where
        /// distances do not matter.
        pub fn uniform(dimension: usize) -> Self {
            Self {
                vector: vec![0.1; dimension],
            }
        }
    }

    impl Respond for FixedEmbeddingResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: serde_json::Value =
                serde_json::from_slice(&request.body).unwrap_or_default();
            let count = match &body["input"] {
                serde_json::Value::Array(inputs) => inputs.len(),
                serde_json::Value::String(_) => 1,
                _ => 1,
            };
            let data: Vec<serde_json::Value> = (0..count)
                .map(|_| json!({ "embedding": self.vector }))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
        }
    }
}

// --- Test-Specific Helpers ---

#[cfg(feature = "pdf")]
pub mod helpers {
    use anyhow::Result;
    use printpdf::{
        BuiltinFont, Layer, Mm, Op, ParsedFont, PdfDocument, PdfPage, PdfSaveOptions, Pt,
        TextItem, TextMatrix, TextRenderingMode,
    };

    /// Generates a simple, single-page PDF with the given text content,
    /// compatible with printpdf v0.8.2.
    pub fn generate_test_pdf(text: &str) -> Result<Vec<u8>> {
        generate_test_pdf_pages(&[text])
    }

    /// Generates a PDF with one page per entry in `pages`.
    pub fn generate_test_pdf_pages(pages: &[&str]) -> Result<Vec<u8>> {
        let mut doc = PdfDocument::new("Test PDF");

        // Get the font bytes for a built-in font and parse it.
        let font_bytes = BuiltinFont::Helvetica.get_subset_font().bytes;
        let font = ParsedFont::from_bytes(&font_bytes, 0, &mut Vec::new())
            .ok_or_else(|| anyhow::anyhow!("Failed to parse built-in font"))?;
        let font_id = doc.add_font(&font);

        for text in pages {
            let mut page = PdfPage::new(Mm(210.0), Mm(297.0), vec![]);
            let layer_def = Layer::new("Layer 1");
            let layer_id = doc.add_layer(&layer_def);

            let ops = vec![
                Op::BeginLayer {
                    layer_id: layer_id.clone(),
                },
                Op::SetFontSize {
                    size: Pt(12.0),
                    font: font_id.clone(),
                },
                Op::StartTextSection,
                Op::SetTextMatrix {
                    matrix: TextMatrix::Translate(Mm(10.0).into(), Mm(280.0).into()),
                },
                Op::SetTextRenderingMode {
                    mode: TextRenderingMode::Fill,
                },
                Op::WriteText {
                    items: vec![TextItem::Text(text.to_string())],
                    font: font_id.clone(),
                },
                Op::EndTextSection,
                Op::EndLayer { layer_id },
            ];

            page.ops = ops;
            doc.pages.push(page);
        }

        let mut warnings = Vec::new();
        let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);
        Ok(bytes)
    }
}
