//! # SQLite Schema Definitions
//!
//! This module centralizes the DDL for the document store and the
//! bibliographic store. Statements are idempotent and safe to run on every
//! application startup.

/// The bibliographic record for any ingested document, book or article.
/// `filename` is the natural key bridging chunks to bibliographic records;
/// `author` is the legacy free-text field retained read-only for fallback.
pub const CREATE_BOOKS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS books (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL DEFAULT '',
        author TEXT,
        category TEXT,
        subcategory TEXT,
        description TEXT,
        tags TEXT,
        document_type TEXT NOT NULL DEFAULT 'book',
        mc_press_url TEXT NOT NULL DEFAULT '',
        article_url TEXT,
        total_pages INTEGER NOT NULL DEFAULT 0,
        file_hash TEXT,
        processed_at TEXT
    );";

/// Author singletons. `name_normalized` (trimmed, lowercased) carries the
/// case-insensitive uniqueness constraint while `name` preserves display
/// case.
pub const CREATE_AUTHORS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS authors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        name_normalized TEXT NOT NULL UNIQUE,
        site_url TEXT,
        created_at TEXT,
        updated_at TEXT
    );";

/// Junction between books and authors with a dense 0-based order per book.
pub const CREATE_DOCUMENT_AUTHORS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS document_authors (
        book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
        author_id INTEGER NOT NULL REFERENCES authors(id),
        author_order INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (book_id, author_id)
    );";

/// The document store: one row per extracted chunk. `embedding` holds the
/// little-endian `f32` vector queried with `vector_distance_cos`.
pub const CREATE_CHUNKS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT NOT NULL,
        content TEXT NOT NULL,
        page_number INTEGER,
        chunk_index INTEGER NOT NULL,
        embedding BLOB,
        metadata TEXT,
        created_at TEXT
    );";

pub const CREATE_CHUNKS_FILENAME_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_chunks_filename ON chunks(filename);";

pub const CREATE_DOCUMENT_AUTHORS_BOOK_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_document_authors_book ON document_authors(book_id);";

/// Every statement needed to bring a fresh database up to the full schema.
pub const ALL_TABLE_CREATION_SQL: &[&str] = &[
    CREATE_BOOKS_TABLE,
    CREATE_AUTHORS_TABLE,
    CREATE_DOCUMENT_AUTHORS_TABLE,
    CREATE_CHUNKS_TABLE,
    CREATE_CHUNKS_FILENAME_INDEX,
    CREATE_DOCUMENT_AUTHORS_BOOK_INDEX,
];
