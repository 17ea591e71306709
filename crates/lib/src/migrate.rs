//! # Legacy Author Migration
//!
//! Moves each book from the legacy free-text `books.author` field to the
//! normalized author graph: parse the string with the same tokenizer the
//! ingestor uses, get-or-create each author, and insert dense-ordered
//! junction rows. Books that already have junction rows are left alone, and
//! per-book failures are collected into the report instead of aborting the
//! batch. The legacy field itself is retained read-only for fallback.

use tracing::{info, warn};
use turso::params;

use crate::biblio::{
    int_value, opt_text_value, split_author_list, text_value, verify_book_authorship, BiblioStore,
};
use crate::errors::RagError;

/// Outcome of one migration run.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Books inspected.
    pub books_seen: usize,
    /// Books whose legacy author string was normalized in this run.
    pub books_migrated: usize,
    /// Books skipped because they already had junction rows.
    pub books_skipped: usize,
    /// Per-book problems; the batch continues past each one.
    pub violations: Vec<MigrationViolation>,
}

#[derive(Debug)]
pub struct MigrationViolation {
    pub filename: String,
    pub detail: String,
}

/// Migrates every book with a legacy author string and no junction rows.
pub async fn migrate_legacy_authors(store: &BiblioStore) -> Result<MigrationReport, RagError> {
    let conn = store.database().connect()?;
    let mut rows = conn
        .query("SELECT id, filename, author FROM books ORDER BY id", ())
        .await?;

    let mut books = Vec::new();
    while let Some(row) = rows.next().await? {
        books.push((
            int_value(row.get_value(0)?),
            text_value(row.get_value(1)?),
            opt_text_value(row.get_value(2)?),
        ));
    }

    let mut report = MigrationReport::default();
    for (book_id, filename, legacy_author) in books {
        report.books_seen += 1;

        if store.count_authors_for_document(book_id).await? > 0 {
            report.books_skipped += 1;
            continue;
        }

        let names = legacy_author
            .as_deref()
            .map(split_author_list)
            .unwrap_or_default();
        if names.is_empty() {
            warn!(filename, "legacy author field yields no parsable names");
            report.violations.push(MigrationViolation {
                filename,
                detail: "legacy author field yields no parsable names".to_string(),
            });
            continue;
        }

        if let Err(err) = store.set_document_authors(book_id, &names).await {
            warn!(filename, error = %err, "failed to migrate book authorship");
            report.violations.push(MigrationViolation {
                filename,
                detail: err.to_string(),
            });
            continue;
        }

        match verify_book_authorship(store, book_id).await? {
            Some(detail) => {
                report.violations.push(MigrationViolation { filename, detail });
            }
            None => {
                report.books_migrated += 1;
            }
        }
    }

    info!(
        seen = report.books_seen,
        migrated = report.books_migrated,
        skipped = report.books_skipped,
        violations = report.violations.len(),
        "legacy author migration finished"
    );
    Ok(report)
}

/// Convenience check for operators: true when a book's `filename` still
/// resolves only through the legacy layout.
pub async fn is_legacy_only(store: &BiblioStore, filename: &str) -> Result<bool, RagError> {
    let conn = store.database().connect()?;
    let mut rows = conn
        .query(
            "SELECT b.id, COUNT(da.author_id)
             FROM books b
             LEFT JOIN document_authors da ON da.book_id = b.id
             WHERE b.filename = ?
             GROUP BY b.id",
            params![filename],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(int_value(row.get_value(1)?) == 0),
        None => Ok(false),
    }
}
