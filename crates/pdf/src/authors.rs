//! # Author Extraction
//!
//! Pulls author names out of a PDF: the document's Info dictionary is
//! consulted first, and when it is empty or implausible the first two pages
//! of text are scanned against an ordered pattern list. Multi-author
//! strings use the same tokenizer as the legacy migration, so both produce
//! identical author lists.

use std::sync::LazyLock;

use pressrag::biblio::split_author_list;
use regex::Regex;

/// Words that disqualify a candidate name: publisher boilerplate and
/// placeholders, matched on whole words of the lowercased candidate.
const DISQUALIFYING_WORDS: &[&str] = &[
    "press",
    "publishing",
    "publications",
    "publisher",
    "inc",
    "llc",
    "ltd",
    "company",
    "corporation",
    "copyright",
    "edition",
    "rights",
    "reserved",
    "unknown",
    "anonymous",
    "admin",
    "author",
    "authors",
];

/// Ordered patterns scanned against page text. Each captures the remainder
/// of the line as the candidate author string.
static PAGE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)^\s*by[:\s]\s*(.+?)\s*$",
        r"(?im)^\s*written\s+by[:\s]\s*(.+?)\s*$",
        r"(?im)^\s*authors?\s*[:\s]\s*(.+?)\s*$",
        r"(?im)copyright\s*(?:©|\(c\))?\s*\d{4}\s*(?:by\s+)?(.+?)\s*$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid author pattern"))
    .collect()
});

/// Extracts an ordered, deduplicated author list.
///
/// `metadata_author` wins when it parses into at least one plausible name;
/// otherwise the given pages (callers pass the first two) are scanned in
/// pattern order, and the first pattern that yields plausible names wins.
pub fn extract_authors(metadata_author: Option<&str>, pages: &[&str]) -> Vec<String> {
    if let Some(raw) = metadata_author {
        let names = plausible_names(raw);
        if !names.is_empty() {
            return names;
        }
    }

    for pattern in PAGE_PATTERNS.iter() {
        for page in pages.iter().take(2) {
            if let Some(captures) = pattern.captures(page) {
                if let Some(candidate) = captures.get(1) {
                    let names = plausible_names(candidate.as_str());
                    if !names.is_empty() {
                        return names;
                    }
                }
            }
        }
    }

    Vec::new()
}

/// Tokenizes a raw author string and keeps only plausible person names.
fn plausible_names(raw: &str) -> Vec<String> {
    split_author_list(raw)
        .into_iter()
        .filter(|name| is_plausible_author(name))
        .collect()
}

/// A candidate is plausible when it looks like a person's name rather than
/// publisher boilerplate: reasonable length, mostly letters, no
/// disqualifying words, and not over-long.
pub fn is_plausible_author(name: &str) -> bool {
    let trimmed = name.trim();
    let char_count = trimmed.chars().count();
    if !(4..=80).contains(&char_count) {
        return false;
    }
    if !trimmed.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    if trimmed.chars().any(|c| c.is_numeric()) {
        return false;
    }
    let words: Vec<String> = trimmed
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .collect();
    if words.is_empty() || words.len() > 6 {
        return false;
    }
    if words
        .iter()
        .any(|word| DISQUALIFYING_WORDS.contains(&word.as_str()))
    {
        return false;
    }
    // Person names are title-cased; this keeps prose fragments like
    // "the way" that slip through a "By ..." match from becoming authors.
    trimmed
        .split_whitespace()
        .all(|word| word.chars().next().is_some_and(|c| c.is_uppercase()))
}
