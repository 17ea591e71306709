//! # Bibliographic Store
//!
//! Persists and serves the Book / Author / DocumentAuthor graph that backs
//! citation enrichment. Authors are singletons: each distinct name (compared
//! case-insensitively) corresponds to exactly one row, shared across every
//! citing book, so edits propagate without per-book copies.
//!
//! Invariants enforced here:
//! - every book keeps at least one junction row once it has any;
//! - `author_order` stays dense and 0-based per book;
//! - `(book_id, author_id)` pairs are unique;
//! - non-empty URLs parse as `http://` or `https://`.

use std::collections::HashSet;
use std::fmt::{self, Debug};

use chrono::Utc;
use tracing::{info, warn};
use turso::{params, Database, Value as TursoValue};

use crate::errors::RagError;
use crate::providers::db::sqlite::SqliteProvider;
use crate::types::{BookRecord, DocumentType, OrderedAuthor};

/// Fields of an author row that can be edited. `None` leaves a field
/// unchanged; `site_url: Some(None)` clears the link.
#[derive(Debug, Clone, Default)]
pub struct AuthorUpdate {
    pub name: Option<String>,
    pub site_url: Option<Option<String>>,
}

/// Everything needed to enrich a citation for one filename.
#[derive(Debug, Clone)]
pub struct BookEnrichment {
    pub book_id: i64,
    pub title: String,
    pub document_type: DocumentType,
    pub mc_press_url: String,
    pub article_url: Option<String>,
    /// The legacy free-text author field, used as fallback when the
    /// junction has no rows.
    pub legacy_author: Option<String>,
    pub authors: Vec<OrderedAuthor>,
}

/// Handle to the bibliographic tables. Cloning shares the database.
#[derive(Clone)]
pub struct BiblioStore {
    db: Database,
}

impl Debug for BiblioStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiblioStore").finish_non_exhaustive()
    }
}

/// Normalizes an author name for identity comparison: trimmed and
/// lowercased. Display case is preserved separately.
pub fn normalize_author_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Splits a free-text author string on `;`, `,`, and the word `and`,
/// trimming each part and deduplicating case-insensitively while preserving
/// first-seen order. The ingestor and the legacy migration share this
/// tokenizer so both produce the same author lists.
pub fn split_author_list(raw: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();

    for piece in raw.split(';').flat_map(|s| s.split(',')) {
        for name in split_on_and(piece) {
            let name = name.trim().trim_matches('.').trim();
            if name.is_empty() {
                continue;
            }
            let key = normalize_author_name(name);
            if seen.insert(key) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Splits on the standalone word "and" (case-insensitive), without touching
/// names like "Anderson".
fn split_on_and(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    loop {
        // ASCII lowering keeps byte offsets aligned with the original.
        let lowered = rest.to_ascii_lowercase();
        match lowered.find(" and ") {
            Some(pos) => {
                parts.push(&rest[..pos]);
                rest = &rest[pos + 5..];
            }
            None => {
                parts.push(rest);
                return parts;
            }
        }
    }
}

/// Checks that a non-empty URL is `http://` or `https://` with a non-empty
/// remainder.
pub fn validate_url(url: &str) -> Result<(), RagError> {
    let valid = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .is_some_and(|rest| !rest.is_empty());
    if valid {
        Ok(())
    } else {
        Err(RagError::ConstraintViolation(format!(
            "URL '{url}' must start with http:// or https://"
        )))
    }
}

pub(crate) fn text_value(value: TursoValue) -> String {
    match value {
        TursoValue::Text(s) => s,
        _ => String::new(),
    }
}

pub(crate) fn opt_text_value(value: TursoValue) -> Option<String> {
    match value {
        TursoValue::Text(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

pub(crate) fn int_value(value: TursoValue) -> i64 {
    match value {
        TursoValue::Integer(i) => i,
        _ => 0,
    }
}

pub(crate) fn opt_int_value(value: TursoValue) -> Option<i64> {
    match value {
        TursoValue::Integer(i) => Some(i),
        _ => None,
    }
}

pub(crate) fn real_value(value: TursoValue) -> f64 {
    match value {
        TursoValue::Real(f) => f,
        TursoValue::Integer(i) => i as f64,
        _ => 0.0,
    }
}

impl BiblioStore {
    pub fn new(provider: &SqliteProvider) -> Self {
        Self {
            db: provider.db.clone(),
        }
    }

    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    /// Returns the id for an author name, creating the row if it does not
    /// exist yet. Deduplication is case-insensitive on the normalized name
    /// and races resolve on the database's unique constraint, not an
    /// application lock.
    pub async fn get_or_create_author(
        &self,
        name: &str,
        site_url: Option<&str>,
    ) -> Result<i64, RagError> {
        let display = name.trim();
        if display.is_empty() {
            return Err(RagError::ConstraintViolation(
                "author name must not be empty".to_string(),
            ));
        }
        if let Some(url) = site_url.filter(|u| !u.is_empty()) {
            validate_url(url)?;
        }

        let normalized = normalize_author_name(display);
        let now = Utc::now().to_rfc3339();
        let conn = self.db.connect()?;

        conn.execute(
            "INSERT INTO authors (name, name_normalized, site_url, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(name_normalized) DO NOTHING",
            params![display, normalized.clone(), site_url, now.clone(), now],
        )
        .await?;

        let mut rows = conn
            .query(
                "SELECT id FROM authors WHERE name_normalized = ?",
                params![normalized],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(int_value(row.get_value(0)?)),
            None => Err(RagError::Internal(anyhow::anyhow!(
                "author '{display}' missing after upsert"
            ))),
        }
    }

    /// Edits an author row. Because authors are singletons, the change is
    /// visible to every citing book immediately.
    pub async fn update_author(&self, id: i64, update: AuthorUpdate) -> Result<(), RagError> {
        let conn = self.db.connect()?;
        let now = Utc::now().to_rfc3339();

        if let Some(new_name) = &update.name {
            let display = new_name.trim();
            if display.is_empty() {
                return Err(RagError::ConstraintViolation(
                    "author name must not be empty".to_string(),
                ));
            }
            let normalized = normalize_author_name(display);

            let mut rows = conn
                .query(
                    "SELECT id FROM authors WHERE name_normalized = ? AND id != ?",
                    params![normalized.clone(), id],
                )
                .await?;
            if rows.next().await?.is_some() {
                return Err(RagError::ConstraintViolation(format!(
                    "another author already uses the name '{display}'"
                )));
            }

            conn.execute(
                "UPDATE authors SET name = ?, name_normalized = ?, updated_at = ? WHERE id = ?",
                params![display, normalized, now.clone(), id],
            )
            .await?;
        }

        if let Some(site_url) = &update.site_url {
            if let Some(url) = site_url.as_deref().filter(|u| !u.is_empty()) {
                validate_url(url)?;
            }
            conn.execute(
                "UPDATE authors SET site_url = ?, updated_at = ? WHERE id = ?",
                params![site_url.clone(), now, id],
            )
            .await?;
        }

        Ok(())
    }

    /// Attaches an author to a book at an explicit order position. Rejects
    /// a duplicate association.
    pub async fn add_author_to_document(
        &self,
        book_id: i64,
        author_id: i64,
        author_order: i64,
    ) -> Result<(), RagError> {
        let conn = self.db.connect()?;

        let mut rows = conn
            .query(
                "SELECT 1 FROM document_authors WHERE book_id = ? AND author_id = ?",
                params![book_id, author_id],
            )
            .await?;
        if rows.next().await?.is_some() {
            return Err(RagError::ConstraintViolation(format!(
                "author {author_id} is already attached to book {book_id}"
            )));
        }

        conn.execute(
            "INSERT INTO document_authors (book_id, author_id, author_order) VALUES (?, ?, ?)",
            params![book_id, author_id, author_order],
        )
        .await?;
        Ok(())
    }

    /// Detaches an author from a book, re-compacting the remaining orders
    /// so they stay dense. Rejects removing the last author.
    pub async fn remove_author_from_document(
        &self,
        book_id: i64,
        author_id: i64,
    ) -> Result<(), RagError> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction().await?;

        let mut rows = tx
            .query(
                "SELECT COUNT(*) FROM document_authors WHERE book_id = ?",
                params![book_id],
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => int_value(row.get_value(0)?),
            None => 0,
        };
        if count <= 1 {
            return Err(RagError::ConstraintViolation(format!(
                "book {book_id} must keep at least one author"
            )));
        }

        let removed = tx
            .execute(
                "DELETE FROM document_authors WHERE book_id = ? AND author_id = ?",
                params![book_id, author_id],
            )
            .await?;
        if removed == 0 {
            return Err(RagError::ConstraintViolation(format!(
                "author {author_id} is not attached to book {book_id}"
            )));
        }

        // Re-compact to keep author_order dense and 0-based.
        let mut remaining = Vec::new();
        let mut rows = tx
            .query(
                "SELECT author_id FROM document_authors WHERE book_id = ? ORDER BY author_order",
                params![book_id],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            remaining.push(int_value(row.get_value(0)?));
        }
        for (position, id) in remaining.iter().enumerate() {
            tx.execute(
                "UPDATE document_authors SET author_order = ? WHERE book_id = ? AND author_id = ?",
                params![position as i64, book_id, *id],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Replaces all order positions for a book's authors atomically. The
    /// given ids must be exactly the currently attached set.
    pub async fn reorder_authors(
        &self,
        book_id: i64,
        ordered_author_ids: &[i64],
    ) -> Result<(), RagError> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction().await?;

        let mut current = HashSet::new();
        let mut rows = tx
            .query(
                "SELECT author_id FROM document_authors WHERE book_id = ?",
                params![book_id],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            current.insert(int_value(row.get_value(0)?));
        }

        let requested: HashSet<i64> = ordered_author_ids.iter().copied().collect();
        if requested.len() != ordered_author_ids.len() || requested != current {
            return Err(RagError::ConstraintViolation(format!(
                "reorder for book {book_id} must list each attached author exactly once"
            )));
        }

        for (position, author_id) in ordered_author_ids.iter().enumerate() {
            tx.execute(
                "UPDATE document_authors SET author_order = ? WHERE book_id = ? AND author_id = ?",
                params![position as i64, book_id, *author_id],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Returns a book's authors ordered by their `author_order`.
    pub async fn get_authors_for_document(
        &self,
        book_id: i64,
    ) -> Result<Vec<OrderedAuthor>, RagError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT a.id, a.name, a.site_url, da.author_order
                 FROM document_authors da
                 JOIN authors a ON a.id = da.author_id
                 WHERE da.book_id = ?
                 ORDER BY da.author_order ASC",
                params![book_id],
            )
            .await?;

        let mut authors = Vec::new();
        while let Some(row) = rows.next().await? {
            authors.push(OrderedAuthor {
                id: int_value(row.get_value(0)?),
                name: text_value(row.get_value(1)?),
                site_url: opt_text_value(row.get_value(2)?),
                author_order: int_value(row.get_value(3)?),
            });
        }
        Ok(authors)
    }

    /// Replaces a book's author list with the given ordered display names.
    /// Names are created as needed and deduplicated case-insensitively.
    pub async fn set_document_authors(
        &self,
        book_id: i64,
        names: &[String],
    ) -> Result<Vec<i64>, RagError> {
        let mut author_ids = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            let key = normalize_author_name(name);
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            author_ids.push(self.get_or_create_author(name, None).await?);
        }

        let mut conn = self.db.connect()?;
        let tx = conn.transaction().await?;
        tx.execute(
            "DELETE FROM document_authors WHERE book_id = ?",
            params![book_id],
        )
        .await?;
        for (position, author_id) in author_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO document_authors (book_id, author_id, author_order) VALUES (?, ?, ?)",
                params![book_id, *author_id, position as i64],
            )
            .await?;
        }
        tx.commit().await?;

        Ok(author_ids)
    }

    /// Looks up the bibliographic record for a filename.
    pub async fn get_book_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<BookRecord>, RagError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT id, filename, title, author, category, document_type,
                        mc_press_url, article_url, total_pages
                 FROM books WHERE filename = ?",
                params![filename],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(BookRecord {
                id: int_value(row.get_value(0)?),
                filename: text_value(row.get_value(1)?),
                title: text_value(row.get_value(2)?),
                author: opt_text_value(row.get_value(3)?),
                category: opt_text_value(row.get_value(4)?),
                document_type: DocumentType::from_db(&text_value(row.get_value(5)?)),
                mc_press_url: text_value(row.get_value(6)?),
                article_url: opt_text_value(row.get_value(7)?),
                total_pages: int_value(row.get_value(8)?),
            })),
            None => Ok(None),
        }
    }

    /// Produces the enrichment payload for a filename: title, type, URLs,
    /// and the ordered author list. Returns `None` when no book row exists.
    pub async fn enrich(&self, filename: &str) -> Result<Option<BookEnrichment>, RagError> {
        let Some(book) = self.get_book_by_filename(filename).await? else {
            return Ok(None);
        };
        let authors = self.get_authors_for_document(book.id).await?;
        Ok(Some(BookEnrichment {
            book_id: book.id,
            title: book.title,
            document_type: book.document_type,
            mc_press_url: book.mc_press_url,
            article_url: book.article_url,
            legacy_author: book.author,
            authors,
        }))
    }

    /// Deletes a book together with its junction rows and chunks. Author
    /// rows are left in place: they may be referenced by other books, and
    /// unreferenced ones are retained as an operational choice.
    ///
    /// Returns `false` when no book matches the filename.
    pub async fn delete_book(&self, filename: &str) -> Result<bool, RagError> {
        let Some(book) = self.get_book_by_filename(filename).await? else {
            return Ok(false);
        };

        let mut conn = self.db.connect()?;
        let tx = conn.transaction().await?;
        tx.execute(
            "DELETE FROM document_authors WHERE book_id = ?",
            params![book.id],
        )
        .await?;
        tx.execute("DELETE FROM chunks WHERE filename = ?", params![filename])
            .await?;
        tx.execute("DELETE FROM books WHERE id = ?", params![book.id])
            .await?;
        tx.commit().await?;

        info!(filename, book_id = book.id, "deleted book with its chunks");
        Ok(true)
    }

    /// Counts junction rows for a book. Zero means the book is still on the
    /// legacy single-author layout.
    pub async fn count_authors_for_document(&self, book_id: i64) -> Result<i64, RagError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM document_authors WHERE book_id = ?",
                params![book_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(int_value(row.get_value(0)?)),
            None => Ok(0),
        }
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }
}

/// Warn-level check used by the migration: verifies the per-book invariants
/// (at least one author, dense contiguous order) and returns a description
/// of the first violation found.
pub(crate) async fn verify_book_authorship(
    store: &BiblioStore,
    book_id: i64,
) -> Result<Option<String>, RagError> {
    let authors = store.get_authors_for_document(book_id).await?;
    if authors.is_empty() {
        return Ok(Some("book has no authors".to_string()));
    }
    for (position, author) in authors.iter().enumerate() {
        if author.author_order != position as i64 {
            warn!(
                book_id,
                expected = position,
                found = author.author_order,
                "author_order is not dense"
            );
            return Ok(Some(format!(
                "author_order is not dense: expected {position}, found {}",
                author.author_order
            )));
        }
    }
    Ok(None)
}
