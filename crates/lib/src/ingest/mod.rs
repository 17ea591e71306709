//! # Ingestion Contract
//!
//! The trait every document ingestor implements, and the standardized
//! summary an ingestion returns. Format-specific pipelines (PDF today) live
//! in their own crates and plug in through [`Ingestor`].

use crate::errors::RagError;
use crate::types::BookHint;
use async_trait::async_trait;

/// Represents the successful result of an ingestion operation.
#[derive(Debug, Clone, Default)]
pub struct IngestionResult {
    /// The filename the document was ingested under.
    pub filename: String,
    /// The number of chunks persisted for this document.
    pub chunks_created: usize,
    /// The number of pages the extractor saw.
    pub pages: usize,
    /// Ordered author display names attached to the bibliographic record.
    pub authors: Vec<String>,
}

/// A generic trait that defines the contract for an ingestion plugin.
///
/// An ingestor takes raw document bytes, produces ordered typed chunks and
/// a bibliographic hint, and hands both to the indexer. The operation is
/// idempotent by `filename`: re-ingesting the same bytes with the same
/// configuration leaves the same observable chunk set and author list.
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Runs the full ingestion pipeline for one document.
    ///
    /// # Arguments
    ///
    /// * `filename`: The external name the document is keyed by.
    /// * `bytes`: The raw document content.
    /// * `hint`: Optional metadata overrides (title, category, declared
    ///   authors) that take precedence over anything extracted.
    async fn ingest(
        &self,
        filename: &str,
        bytes: &[u8],
        hint: Option<BookHint>,
    ) -> Result<IngestionResult, RagError>;
}
