//! # Legacy Author Migration Tests
//!
//! Verifies that free-text `books.author` values normalize into the author
//! graph with parse order preserved, shared authors collapse to one row,
//! unparsable values surface as violations without aborting the batch, and
//! the migration is idempotent.

use anyhow::Result;
use pressrag::biblio::BiblioStore;
use pressrag::migrate::{is_legacy_only, migrate_legacy_authors};
use pressrag_test_utils::TestSetup;
use turso::params;

mod common;
use common::setup_tracing;

async fn seed_book(setup: &TestSetup, filename: &str, legacy_author: Option<&str>) -> Result<i64> {
    let conn = setup.db.connect()?;
    conn.execute(
        "INSERT INTO books (filename, title, author) VALUES (?, ?, ?)",
        params![filename, filename, legacy_author],
    )
    .await?;
    let mut rows = conn
        .query("SELECT id FROM books WHERE filename = ?", params![filename])
        .await?;
    Ok(rows.next().await?.expect("book row").get::<i64>(0)?)
}

#[tokio::test]
async fn migration_normalizes_legacy_authors_in_parse_order() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = BiblioStore::from_database(setup.db.clone());

    let single = seed_book(&setup, "single.pdf", Some("Jerry Fottral")).await?;
    let multi = seed_book(&setup, "multi.pdf", Some("Alice Johnson and Bob Smith")).await?;
    let mixed = seed_book(&setup, "mixed.pdf", Some("Alice Johnson, Carol Jones; Dan Riehl")).await?;

    let report = migrate_legacy_authors(&store).await?;
    assert_eq!(report.books_seen, 3);
    assert_eq!(report.books_migrated, 3);
    assert!(report.violations.is_empty());

    let authors = store.get_authors_for_document(single).await?;
    assert_eq!(authors.len(), 1);
    assert_eq!(authors[0].name, "Jerry Fottral");
    assert_eq!(authors[0].author_order, 0);

    let authors = store.get_authors_for_document(multi).await?;
    let names: Vec<&str> = authors.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Alice Johnson", "Bob Smith"]);

    let authors = store.get_authors_for_document(mixed).await?;
    let names: Vec<&str> = authors.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Alice Johnson", "Carol Jones", "Dan Riehl"]);
    assert_eq!(
        authors.iter().map(|a| a.author_order).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    Ok(())
}

#[tokio::test]
async fn shared_names_collapse_to_one_author_row() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = BiblioStore::from_database(setup.db.clone());

    let first = seed_book(&setup, "b1.pdf", Some("Alice Johnson and Bob Smith")).await?;
    let second = seed_book(&setup, "b2.pdf", Some("alice johnson")).await?;

    migrate_legacy_authors(&store).await?;

    let first_authors = store.get_authors_for_document(first).await?;
    let second_authors = store.get_authors_for_document(second).await?;
    assert_eq!(first_authors[0].id, second_authors[0].id);

    let conn = setup.db.connect()?;
    let mut rows = conn.query("SELECT COUNT(*) FROM authors", ()).await?;
    assert_eq!(rows.next().await?.expect("row").get::<i64>(0)?, 2);
    Ok(())
}

#[tokio::test]
async fn unparsable_legacy_values_become_violations_without_aborting() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = BiblioStore::from_database(setup.db.clone());

    seed_book(&setup, "empty.pdf", None).await?;
    seed_book(&setup, "blank.pdf", Some("   ")).await?;
    let good = seed_book(&setup, "good.pdf", Some("Jerry Fottral")).await?;

    let report = migrate_legacy_authors(&store).await?;
    assert_eq!(report.books_seen, 3);
    assert_eq!(report.books_migrated, 1);
    assert_eq!(report.violations.len(), 2);
    let violating: Vec<&str> = report
        .violations
        .iter()
        .map(|v| v.filename.as_str())
        .collect();
    assert!(violating.contains(&"empty.pdf"));
    assert!(violating.contains(&"blank.pdf"));

    // The parseable book still migrated.
    assert_eq!(store.get_authors_for_document(good).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn migration_is_idempotent_and_leaves_normalized_books_alone() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = BiblioStore::from_database(setup.db.clone());

    let book = seed_book(&setup, "b1.pdf", Some("Jerry Fottral")).await?;

    let first = migrate_legacy_authors(&store).await?;
    assert_eq!(first.books_migrated, 1);
    assert!(!is_legacy_only(&store, "b1.pdf").await?);

    // Hand-edit after migration; a re-run must not clobber it.
    let alice = store.get_or_create_author("Alice Johnson", None).await?;
    store.add_author_to_document(book, alice, 1).await?;

    let second = migrate_legacy_authors(&store).await?;
    assert_eq!(second.books_migrated, 0);
    assert_eq!(second.books_skipped, 1);

    let authors = store.get_authors_for_document(book).await?;
    assert_eq!(authors.len(), 2);
    Ok(())
}

#[tokio::test]
async fn legacy_field_is_retained_after_migration() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = BiblioStore::from_database(setup.db.clone());

    seed_book(&setup, "b1.pdf", Some("Jerry Fottral")).await?;
    migrate_legacy_authors(&store).await?;

    let book = store
        .get_book_by_filename("b1.pdf")
        .await?
        .expect("book record");
    assert_eq!(book.author.as_deref(), Some("Jerry Fottral"));
    Ok(())
}
