//! # Core Data Types
//!
//! The typed records that flow through the pipeline: chunks produced by
//! ingestion, bibliographic records and hints, retrieval results, and the
//! chat event / source shapes that form the external streaming contract.

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// The closed set of chunk kinds extracted from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Text,
    Code,
    Image,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Text => "text",
            ChunkType::Code => "code",
            ChunkType::Image => "image",
        }
    }
}

/// An atomic, typed passage extracted from a document, in document order.
///
/// Chunk boundaries are a pure function of the input bytes and the splitter
/// configuration: re-ingesting the same bytes yields the same chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    /// 1-based page the chunk was extracted from.
    pub page_number: Option<u32>,
    /// Position of the chunk within the document.
    pub chunk_index: u32,
    pub chunk_type: ChunkType,
    /// Language label for `code` chunks, when detection is confident.
    pub language: Option<String>,
    /// True when the content came out of image OCR.
    pub ocr: bool,
}

impl Chunk {
    /// Serializes the ancillary metadata persisted alongside the content.
    pub fn metadata_json(&self) -> String {
        serde_json::json!({
            "type": self.chunk_type.as_str(),
            "language": self.language,
            "ocr": self.ocr,
        })
        .to_string()
    }
}

/// Whether a bibliographic record describes a book or an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Book,
    Article,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Book => "book",
            DocumentType::Article => "article",
        }
    }

    /// Parses a stored value, defaulting to `Book` for anything unknown.
    pub fn from_db(value: &str) -> Self {
        match value {
            "article" => DocumentType::Article,
            _ => DocumentType::Book,
        }
    }
}

/// Bibliographic hints extracted during ingestion (or supplied as overrides)
/// that feed the book upsert.
#[derive(Debug, Clone, Default)]
pub struct BookHint {
    pub title: Option<String>,
    pub category: Option<String>,
    /// Ordered, deduplicated author display names.
    pub authors: Vec<String>,
    pub document_type: Option<DocumentType>,
    pub mc_press_url: Option<String>,
    pub article_url: Option<String>,
    pub total_pages: Option<u32>,
    pub file_hash: Option<String>,
}

/// A persisted bibliographic record.
#[derive(Debug, Clone, Serialize)]
pub struct BookRecord {
    pub id: i64,
    pub filename: String,
    pub title: String,
    /// Legacy free-text author field, retained read-only for fallback.
    pub author: Option<String>,
    pub category: Option<String>,
    pub document_type: DocumentType,
    pub mc_press_url: String,
    pub article_url: Option<String>,
    pub total_pages: i64,
}

/// An author joined through the junction table, in `author_order` position.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedAuthor {
    pub id: i64,
    pub name: String,
    pub site_url: Option<String>,
    pub author_order: i64,
}

/// A chunk returned by retrieval, with its cosine distance to the query.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub filename: String,
    pub content: String,
    pub page_number: Option<i64>,
    pub chunk_type: ChunkType,
    pub distance: f64,
}

/// A page reference in a source citation: a 1-based page number, or `"N/A"`
/// when the chunk carries none.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageRef {
    Number(i64),
    NotAvailable,
}

impl Serialize for PageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PageRef::Number(n) => serializer.serialize_i64(*n),
            PageRef::NotAvailable => serializer.serialize_str("N/A"),
        }
    }
}

impl From<Option<i64>> for PageRef {
    fn from(page: Option<i64>) -> Self {
        match page {
            Some(n) => PageRef::Number(n),
            None => PageRef::NotAvailable,
        }
    }
}

/// One author entry inside a [`Source`] citation.
///
/// Junction-backed authors carry their row id; the legacy single-author
/// fallback carries none.
#[derive(Debug, Clone, Serialize)]
pub struct SourceAuthor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub site_url: Option<String>,
    pub order: i64,
}

/// A citation record emitted with the final `done` event.
///
/// The serialized shape is a wire contract consumed bit-exactly by the chat
/// subsystem; field names and null/empty conventions must not drift.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub filename: String,
    pub page: PageRef,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub distance: f64,
    /// Comma-joined display name for all authors.
    pub author: String,
    /// Purchase link; empty string when absent.
    pub mc_press_url: String,
    pub article_url: Option<String>,
    pub document_type: DocumentType,
    pub authors: Vec<SourceAuthor>,
}

/// The ordered stream of events emitted while answering a question.
///
/// A stream carries any number of `token` events followed by exactly one
/// terminal event: `done` or `error`, never both.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Token {
        content: String,
    },
    Done {
        sources: Vec<Source>,
        timestamp: String,
    },
    Error {
        kind: String,
        message: String,
    },
}
