//! # Answerer
//!
//! Composes a grounded prompt from retrieved chunks, invokes the LLM with
//! streaming, and emits an ordered stream of events: any number of `token`
//! events followed by exactly one terminal `done` (with the enriched source
//! list) or `error`. Dropping the returned stream cancels the work at the
//! next token boundary; no further events are produced and the upstream
//! connection is released.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, instrument, warn};

use crate::biblio::{BiblioStore, BookEnrichment};
use crate::config::RetrievalConfig;
use crate::errors::{AiError, RagError};
use crate::prompts::{ANSWER_SYSTEM_PROMPT, ANSWER_USER_PROMPT};
use crate::providers::ai::AiProvider;
use crate::search::Retriever;
use crate::types::{ChatEvent, DocumentType, PageRef, RetrievedChunk, Source, SourceAuthor};

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct AnswerOptions {
    /// Overall deadline for the call, measured from `answer()`.
    pub deadline: Option<Duration>,
}

/// Orchestrates retrieve → prompt → stream → enrich for one question at a
/// time. Cloning is cheap; per-request state lives on the task stack.
#[derive(Clone)]
pub struct Answerer {
    retriever: Retriever,
    ai: Box<dyn AiProvider>,
    biblio: BiblioStore,
}

impl std::fmt::Debug for Answerer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Answerer").finish_non_exhaustive()
    }
}

impl Answerer {
    pub fn new(retriever: Retriever, ai: Box<dyn AiProvider>, biblio: BiblioStore) -> Self {
        Self {
            retriever,
            ai,
            biblio,
        }
    }

    /// Answers a question as an event stream.
    ///
    /// The caller consumes events by pulling from the returned stream;
    /// dropping it is the cancellation signal.
    pub fn answer(&self, question: &str, options: AnswerOptions) -> ReceiverStream<ChatEvent> {
        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();
        let question = question.to_string();
        tokio::spawn(async move {
            this.run(question, options, tx).await;
        });
        ReceiverStream::new(rx)
    }

    #[instrument(skip(self, tx), fields(question_len = question.len()))]
    async fn run(self, question: String, options: AnswerOptions, tx: mpsc::Sender<ChatEvent>) {
        let started = Instant::now();

        // --- Stage 1: Retrieval ---
        let retrieve_future = self.retriever.retrieve(&question);
        let retrieved = match await_within(options.deadline, started, retrieve_future).await {
            Some(Ok(chunks)) => chunks,
            Some(Err(err)) => {
                send_error(&tx, &err).await;
                return;
            }
            None => {
                send_error(&tx, &RagError::Timeout).await;
                return;
            }
        };

        // --- Stage 2: Prompt + stream setup ---
        let config = self.retriever.config();
        let (system_prompt, user_prompt) =
            build_prompt(&question, &retrieved, config.context_char_budget);

        let stream_future = self.ai.generate_stream(&system_prompt, &user_prompt);
        let mut token_stream = match await_within(options.deadline, started, stream_future).await {
            Some(Ok(stream)) => stream,
            Some(Err(err)) => {
                send_error(&tx, &map_setup_error(err)).await;
                return;
            }
            None => {
                send_error(&tx, &RagError::Timeout).await;
                return;
            }
        };

        // --- Stage 3: Token forwarding ---
        loop {
            let next = match remaining(options.deadline, started) {
                Some(window) if window.is_zero() => {
                    send_error(&tx, &RagError::LlmTimeout).await;
                    return;
                }
                Some(window) => match tokio::time::timeout(window, token_stream.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        send_error(&tx, &RagError::LlmTimeout).await;
                        return;
                    }
                },
                None => token_stream.next().await,
            };

            match next {
                Some(Ok(content)) => {
                    if tx.send(ChatEvent::Token { content }).await.is_err() {
                        // Receiver dropped: caller cancelled. Dropping the
                        // token stream releases the upstream connection.
                        info!("answer stream cancelled by caller");
                        return;
                    }
                }
                Some(Err(err)) => {
                    send_error(&tx, &RagError::LlmStreamAborted(err.to_string())).await;
                    return;
                }
                None => break,
            }
        }

        // --- Stage 4: Source enrichment + done ---
        let sources = self.enrich_sources(&retrieved).await;
        let _ = tx
            .send(ChatEvent::Done {
                sources,
                timestamp: Utc::now().to_rfc3339(),
            })
            .await;
    }

    /// Builds one `Source` per retrieved chunk, with a single bibliographic
    /// lookup per distinct filename. Lookup failures degrade to a stub
    /// rather than failing the stream.
    async fn enrich_sources(&self, retrieved: &[RetrievedChunk]) -> Vec<Source> {
        let mut cache: HashMap<String, Option<BookEnrichment>> = HashMap::new();
        let mut sources = Vec::with_capacity(retrieved.len());

        for chunk in retrieved {
            if !cache.contains_key(&chunk.filename) {
                let enrichment = match self.biblio.enrich(&chunk.filename).await {
                    Ok(found) => {
                        if found.is_none() {
                            warn!(
                                filename = %chunk.filename,
                                "{}",
                                RagError::EnrichmentMissing(chunk.filename.clone())
                            );
                        }
                        found
                    }
                    Err(err) => {
                        warn!(filename = %chunk.filename, error = %err, "enrichment lookup failed");
                        None
                    }
                };
                cache.insert(chunk.filename.clone(), enrichment);
            }

            let source = match cache.get(&chunk.filename).and_then(|e| e.as_ref()) {
                Some(enrichment) => enriched_source(chunk, enrichment),
                None => stub_source(chunk),
            };
            sources.push(source);
        }
        sources
    }
}

/// Builds the deterministic prompt pair for a question and its retrieved
/// passages. Passages render in retrieval order and stop accumulating once
/// the character budget would be exceeded; a fixed retrieved set yields a
/// byte-identical prompt.
pub fn build_prompt(
    question: &str,
    retrieved: &[RetrievedChunk],
    context_char_budget: usize,
) -> (String, String) {
    let mut passages = String::new();
    for chunk in retrieved {
        let page = match chunk.page_number {
            Some(n) => n.to_string(),
            None => "N/A".to_string(),
        };
        let block = format!("[{} p.{}]\n{}\n\n", chunk.filename, page, chunk.content);
        if passages.len() + block.len() > context_char_budget {
            break;
        }
        passages.push_str(&block);
    }
    if passages.is_empty() {
        passages.push_str("(no relevant passages found)\n");
    }

    let user_prompt = ANSWER_USER_PROMPT
        .replace("{passages}", passages.trim_end())
        .replace("{question}", question);

    (ANSWER_SYSTEM_PROMPT.to_string(), user_prompt)
}

fn enriched_source(chunk: &RetrievedChunk, enrichment: &BookEnrichment) -> Source {
    let (author_display, authors) = if enrichment.authors.is_empty() {
        // Junction is empty: fall back to the legacy free-text field as a
        // single entry without an id.
        match &enrichment.legacy_author {
            Some(legacy) if !legacy.is_empty() => (
                legacy.clone(),
                vec![SourceAuthor {
                    id: None,
                    name: legacy.clone(),
                    site_url: None,
                    order: 0,
                }],
            ),
            _ => ("Unknown".to_string(), Vec::new()),
        }
    } else {
        let display = enrichment
            .authors
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let authors = enrichment
            .authors
            .iter()
            .map(|a| SourceAuthor {
                id: Some(a.id),
                name: a.name.clone(),
                site_url: a.site_url.clone(),
                order: a.author_order,
            })
            .collect();
        (display, authors)
    };

    Source {
        filename: chunk.filename.clone(),
        page: PageRef::from(chunk.page_number),
        chunk_type: chunk.chunk_type,
        distance: chunk.distance,
        author: author_display,
        mc_press_url: enrichment.mc_press_url.clone(),
        article_url: enrichment.article_url.clone(),
        document_type: enrichment.document_type,
        authors,
    }
}

fn stub_source(chunk: &RetrievedChunk) -> Source {
    Source {
        filename: chunk.filename.clone(),
        page: PageRef::from(chunk.page_number),
        chunk_type: chunk.chunk_type,
        distance: chunk.distance,
        author: "Unknown".to_string(),
        mc_press_url: String::new(),
        article_url: None,
        document_type: DocumentType::Book,
        authors: Vec::new(),
    }
}

fn map_setup_error(err: AiError) -> RagError {
    RagError::LlmUnavailable(err.to_string())
}

async fn send_error(tx: &mpsc::Sender<ChatEvent>, err: &RagError) {
    let _ = tx
        .send(ChatEvent::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        })
        .await;
}

/// Time left under the deadline, if any. `Some(Duration::ZERO)` means the
/// deadline has already passed.
fn remaining(deadline: Option<Duration>, started: Instant) -> Option<Duration> {
    deadline.map(|total| total.saturating_sub(started.elapsed()))
}

/// Awaits a future under the remaining deadline. Returns `None` when the
/// deadline expires first.
async fn await_within<F, T>(
    deadline: Option<Duration>,
    started: Instant,
    future: F,
) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    match remaining(deadline, started) {
        Some(window) => tokio::time::timeout(window, future).await.ok(),
        None => Some(future.await),
    }
}
