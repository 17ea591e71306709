//! # pressrag
//!
//! Retrieval-augmented question answering over a corpus of technical PDFs.
//! The core is a four-stage pipeline over a shared SQLite store: ingestion
//! plugins produce ordered, typed chunks; the indexer embeds and persists
//! them; the retriever ranks and filters them for a question; the answerer
//! streams a grounded LLM response with enriched bibliographic citations.
//!
//! Process-wide resources (the database, the embedding client) are built by
//! the process entry point and injected into components; nothing here
//! discovers configuration at use sites.

pub mod answer;
pub mod biblio;
pub mod config;
pub mod errors;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod prompts;
pub mod providers;
pub mod search;
pub mod types;

pub use answer::{Answerer, AnswerOptions};
pub use biblio::BiblioStore;
pub use config::AppConfig;
pub use errors::{AiError, RagError};
pub use index::Indexer;
pub use providers::ai::{AiProvider, EmbeddingClient, LocalAiProvider};
pub use providers::db::sqlite::SqliteProvider;
pub use search::Retriever;
pub use types::{BookHint, ChatEvent, Chunk, ChunkType, DocumentType, Source};
