//! # Indexer
//!
//! Attaches embeddings to ingested chunks and persists them atomically per
//! document: one write transaction upserts the bibliographic record
//! (preserving the book id across re-ingestion), replaces the ordered
//! author list from the hint, and replaces every prior chunk for the
//! filename with the new set. Either all of it becomes visible or none.

use chrono::Utc;
use tracing::{info, instrument};
use turso::{params, Database};

use crate::biblio::{int_value, BiblioStore};
use crate::errors::RagError;
use crate::providers::ai::EmbeddingClient;
use crate::providers::db::sqlite::SqliteProvider;
use crate::types::{BookHint, Chunk, DocumentType};

/// Summary of one indexing operation.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub book_id: i64,
    pub chunks_indexed: usize,
    /// Ordered author display names attached to the book.
    pub authors: Vec<String>,
}

/// Embeds and persists chunks for one document at a time.
#[derive(Clone)]
pub struct Indexer {
    db: Database,
    embedder: EmbeddingClient,
    biblio: BiblioStore,
}

impl Indexer {
    pub fn new(provider: &SqliteProvider, embedder: EmbeddingClient) -> Self {
        Self {
            db: provider.db.clone(),
            embedder,
            biblio: BiblioStore::new(provider),
        }
    }

    /// Indexes one document: computes embeddings for every chunk, then
    /// replaces the persisted state for `filename` transactionally.
    ///
    /// Re-indexing the same document yields the same observable chunk set
    /// (keyed by filename, page, chunk index) and the same author set;
    /// concurrent re-indexing of one filename serializes on the write
    /// transaction, so a losing writer's chunks are never partially
    /// visible.
    #[instrument(skip(self, chunks, hint), fields(chunk_count = chunks.len()))]
    pub async fn index(
        &self,
        filename: &str,
        mut chunks: Vec<Chunk>,
        hint: &BookHint,
    ) -> Result<IndexSummary, RagError> {
        if chunks.is_empty() {
            return Err(RagError::IngestEmpty(filename.to_string()));
        }

        chunks.sort_by_key(|c| (c.page_number.unwrap_or(0), c.chunk_index));

        // Embeddings happen before the write transaction so a flaky
        // backend cannot leave a half-replaced document behind.
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| RagError::IndexFailed(e.to_string()))?;

        // Author rows are singletons shared across books; creating them
        // outside the transaction is observably equivalent.
        let mut author_ids = Vec::with_capacity(hint.authors.len());
        let mut author_names = Vec::with_capacity(hint.authors.len());
        for name in &hint.authors {
            let id = self.biblio.get_or_create_author(name, None).await?;
            if !author_ids.contains(&id) {
                author_ids.push(id);
                author_names.push(name.trim().to_string());
            }
        }

        for url in [hint.mc_press_url.as_deref(), hint.article_url.as_deref()]
            .into_iter()
            .flatten()
            .filter(|u| !u.is_empty())
        {
            crate::biblio::validate_url(url)
                .map_err(|e| RagError::IndexFailed(e.to_string()))?;
        }

        let title = hint
            .title
            .clone()
            .unwrap_or_else(|| title_from_filename(filename));
        let document_type = hint.document_type.unwrap_or(DocumentType::Book);
        let legacy_author = if author_names.is_empty() {
            None
        } else {
            Some(author_names.join(", "))
        };
        let total_pages = hint.total_pages.map(i64::from).unwrap_or_else(|| {
            chunks
                .iter()
                .filter_map(|c| c.page_number)
                .max()
                .map(i64::from)
                .unwrap_or(0)
        });
        let now = Utc::now().to_rfc3339();

        let mut conn = self
            .db
            .connect()
            .map_err(|e| RagError::IndexFailed(e.to_string()))?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| RagError::IndexFailed(e.to_string()))?;

        // Upsert the book by its natural key. Empty hint fields do not
        // clobber values an admin may have set since the last ingest.
        tx.execute(
            "INSERT INTO books (filename, title, author, category, document_type,
                                mc_press_url, article_url, total_pages, file_hash, processed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(filename) DO UPDATE SET
                 title = COALESCE(NULLIF(excluded.title, ''), books.title),
                 author = COALESCE(excluded.author, books.author),
                 category = COALESCE(excluded.category, books.category),
                 document_type = excluded.document_type,
                 mc_press_url = COALESCE(NULLIF(excluded.mc_press_url, ''), books.mc_press_url),
                 article_url = COALESCE(excluded.article_url, books.article_url),
                 total_pages = excluded.total_pages,
                 file_hash = COALESCE(excluded.file_hash, books.file_hash),
                 processed_at = excluded.processed_at",
            params![
                filename,
                title,
                legacy_author,
                hint.category.clone(),
                document_type.as_str(),
                hint.mc_press_url.clone().unwrap_or_default(),
                hint.article_url.clone(),
                total_pages,
                hint.file_hash.clone(),
                now.clone()
            ],
        )
        .await
        .map_err(|e| RagError::IndexFailed(e.to_string()))?;

        let mut rows = tx
            .query("SELECT id FROM books WHERE filename = ?", params![filename])
            .await
            .map_err(|e| RagError::IndexFailed(e.to_string()))?;
        let book_id = match rows
            .next()
            .await
            .map_err(|e| RagError::IndexFailed(e.to_string()))?
        {
            Some(row) => int_value(
                row.get_value(0)
                    .map_err(|e| RagError::IndexFailed(e.to_string()))?,
            ),
            None => {
                return Err(RagError::IndexFailed(format!(
                    "book '{filename}' missing after upsert"
                )))
            }
        };
        drop(rows);

        if !author_ids.is_empty() {
            tx.execute(
                "DELETE FROM document_authors WHERE book_id = ?",
                params![book_id],
            )
            .await
            .map_err(|e| RagError::IndexFailed(e.to_string()))?;
            for (position, author_id) in author_ids.iter().enumerate() {
                tx.execute(
                    "INSERT INTO document_authors (book_id, author_id, author_order)
                     VALUES (?, ?, ?)",
                    params![book_id, *author_id, position as i64],
                )
                .await
                .map_err(|e| RagError::IndexFailed(e.to_string()))?;
            }
        }

        tx.execute("DELETE FROM chunks WHERE filename = ?", params![filename])
            .await
            .map_err(|e| RagError::IndexFailed(e.to_string()))?;

        for (chunk, vector) in chunks.iter().zip(embeddings.iter()) {
            // Zero-copy view of the f32 vector as little-endian bytes for
            // BLOB storage; f32 is 4 bytes on every supported platform.
            let vector_bytes: &[u8] = unsafe {
                std::slice::from_raw_parts(vector.as_ptr() as *const u8, vector.len() * 4)
            };

            tx.execute(
                "INSERT INTO chunks (filename, content, page_number, chunk_index,
                                     embedding, metadata, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    filename,
                    chunk.content.clone(),
                    chunk.page_number.map(i64::from),
                    chunk.chunk_index as i64,
                    vector_bytes,
                    chunk.metadata_json(),
                    now.clone()
                ],
            )
            .await
            .map_err(|e| RagError::IndexFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RagError::IndexFailed(e.to_string()))?;

        info!(
            filename,
            book_id,
            chunks = chunks.len(),
            authors = author_names.len(),
            "indexed document"
        );

        Ok(IndexSummary {
            book_id,
            chunks_indexed: chunks.len(),
            authors: author_names,
        })
    }
}

/// Derives a readable fallback title from a filename: extension stripped,
/// separators spaced.
fn title_from_filename(filename: &str) -> String {
    let stem = filename
        .rsplit('/')
        .next()
        .unwrap_or(filename)
        .trim_end_matches(".pdf")
        .trim_end_matches(".PDF");
    stem.replace(['_', '-'], " ").trim().to_string()
}
