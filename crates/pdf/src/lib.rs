//! # pressrag-pdf: PDF Ingestion Plugin
//!
//! Transforms a PDF into an ordered sequence of typed chunks (prose, code,
//! OCR'd images) plus a bibliographic hint, and hands both to the indexer.
//! It implements the `Ingestor` trait from `pressrag`.
//!
//! Chunk boundaries are a pure function of the input bytes and the
//! configured splitter geometry, so re-ingesting the same PDF produces
//! identical chunks in the same order.

use std::sync::Arc;

use async_trait::async_trait;
use pressrag::config::IngestConfig;
use pressrag::errors::RagError;
use pressrag::index::Indexer;
use pressrag::ingest::{IngestionResult, Ingestor};
use pressrag::types::{BookHint, Chunk, ChunkType, DocumentType};
use thiserror::Error;
use tracing::{info, instrument, warn};

pub mod authors;
pub mod chunker;
pub mod extract;
pub mod ocr;

use chunker::ChunkerConfig;
use ocr::{normalize_ocr_text, normalized_ocr_len, OcrError, OcrProvider, OCR_MIN_CHARS};

// --- Error Definitions ---

#[derive(Error, Debug)]
pub enum PdfIngestError {
    #[error("Failed to parse PDF content: {0}")]
    Parse(String),
    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("An internal error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PdfIngestError> for RagError {
    fn from(err: PdfIngestError) -> Self {
        match err {
            PdfIngestError::Parse(s) => RagError::IngestParseFailed(s),
            other => RagError::Internal(anyhow::anyhow!(other.to_string())),
        }
    }
}

// --- Ingestor ---

/// The PDF ingestion pipeline: size guard, extraction, typed chunking,
/// author extraction, and handoff to the indexer.
#[derive(Clone)]
pub struct PdfIngestor {
    indexer: Indexer,
    config: IngestConfig,
    ocr: Option<Arc<dyn OcrProvider>>,
}

impl std::fmt::Debug for PdfIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfIngestor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PdfIngestor {
    pub fn new(indexer: Indexer, config: IngestConfig) -> Self {
        Self {
            indexer,
            config,
            ocr: None,
        }
    }

    /// Attaches an OCR provider; without one, images are skipped even when
    /// `ocr_enabled` is set.
    pub fn with_ocr(mut self, ocr: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Runs OCR over the extracted images, returning `(page, text)` for
    /// every image whose recognized text clears the emission threshold.
    async fn ocr_pages(
        &self,
        images: Vec<(u32, Vec<u8>)>,
    ) -> Result<Vec<(u32, String)>, RagError> {
        let Some(provider) = self.ocr.clone().filter(|_| self.config.ocr_enabled) else {
            return Ok(Vec::new());
        };
        if images.is_empty() {
            return Ok(Vec::new());
        }

        // OCR is CPU-bound; keep it off the cooperative scheduler.
        let results = tokio::task::spawn_blocking(move || {
            let mut texts = Vec::new();
            for (page, data) in images {
                match provider.recognize(&data) {
                    Ok(raw) => {
                        let text = normalize_ocr_text(&raw);
                        if normalized_ocr_len(&text) >= OCR_MIN_CHARS {
                            texts.push((page, text));
                        }
                    }
                    Err(e) => {
                        warn!(page, error = %e, "OCR failed for image, skipping");
                    }
                }
            }
            texts
        })
        .await
        .map_err(|e| RagError::Internal(anyhow::anyhow!("join error during OCR: {e}")))?;

        Ok(results)
    }
}

#[async_trait]
impl Ingestor for PdfIngestor {
    /// Ingests one PDF: extract, chunk, attribute, index.
    ///
    /// Per-page parse failures are logged and skipped. A document that
    /// yields zero chunks fails with `IngestEmpty`; oversize uploads fail
    /// with `IngestTooLarge` before extraction.
    #[instrument(skip(self, bytes, hint), fields(size = bytes.len()))]
    async fn ingest(
        &self,
        filename: &str,
        bytes: &[u8],
        hint: Option<BookHint>,
    ) -> Result<IngestionResult, RagError> {
        if bytes.len() > self.config.max_upload_bytes {
            return Err(RagError::IngestTooLarge {
                size: bytes.len(),
                limit: self.config.max_upload_bytes,
            });
        }

        let file_hash = format!("{:x}", md5::compute(bytes));

        // PDF parsing is CPU-intensive; run it on the blocking pool.
        let data = bytes.to_vec();
        let extraction = tokio::task::spawn_blocking(move || extract::extract_document(&data))
            .await
            .map_err(|e| RagError::Internal(anyhow::anyhow!("join error during parse: {e}")))?
            .map_err(RagError::from)?;

        info!(
            filename,
            pages = extraction.page_count,
            "extracted PDF pages"
        );

        let images: Vec<(u32, Vec<u8>)> = extraction
            .pages
            .iter()
            .flat_map(|page| {
                page.images
                    .iter()
                    .map(|data| (page.number, data.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        let ocr_texts = self.ocr_pages(images).await?;

        // Assemble chunks in document order: each page's prose and code
        // first, then that page's image chunks.
        let chunker_config = ChunkerConfig {
            target_chars: self.config.chunk_target_chars,
            overlap_chars: self.config.chunk_overlap_chars,
        };
        let mut chunks = Vec::new();
        let mut chunk_index = 0u32;
        for page in &extraction.pages {
            for piece in chunker::chunk_page(&page.text, &chunker_config) {
                chunks.push(Chunk {
                    content: piece.content,
                    page_number: Some(page.number),
                    chunk_index,
                    chunk_type: piece.chunk_type,
                    language: piece.language,
                    ocr: false,
                });
                chunk_index += 1;
            }
            for (ocr_page, text) in ocr_texts.iter().filter(|(p, _)| *p == page.number) {
                chunks.push(Chunk {
                    content: text.clone(),
                    page_number: Some(*ocr_page),
                    chunk_index,
                    chunk_type: ChunkType::Image,
                    language: None,
                    ocr: true,
                });
                chunk_index += 1;
            }
        }

        if chunks.is_empty() {
            return Err(RagError::IngestEmpty(filename.to_string()));
        }

        // Bibliographic hint: caller overrides win over extracted values.
        let first_pages: Vec<&str> = extraction
            .pages
            .iter()
            .take(2)
            .map(|p| p.text.as_str())
            .collect();
        let extracted_authors =
            authors::extract_authors(extraction.metadata.author.as_deref(), &first_pages);

        let mut hint = hint.unwrap_or_default();
        if hint.title.is_none() {
            hint.title = extraction.metadata.title.clone();
        }
        if hint.authors.is_empty() {
            hint.authors = extracted_authors;
        }
        if hint.document_type.is_none() {
            hint.document_type = Some(DocumentType::Book);
        }
        hint.total_pages = Some(extraction.page_count);
        hint.file_hash = Some(file_hash);

        let summary = self.indexer.index(filename, chunks, &hint).await?;

        Ok(IngestionResult {
            filename: filename.to_string(),
            chunks_created: summary.chunks_indexed,
            pages: extraction.page_count as usize,
            authors: summary.authors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::MockOcrProvider;

    #[test]
    fn ocr_threshold_drops_short_text() {
        let short = MockOcrProvider::new("tiny");
        let text = short.recognize(&[]).unwrap();
        assert!(normalized_ocr_len(&text) < OCR_MIN_CHARS);

        let long = MockOcrProvider::new("Figure 3: batch throughput by release level");
        let text = long.recognize(&[]).unwrap();
        assert!(normalized_ocr_len(&text) >= OCR_MIN_CHARS);
    }
}
