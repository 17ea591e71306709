//! # Page Chunking
//!
//! Splits a page's extracted text into typed chunks. Code blocks are
//! detected first (fenced regions, indent runs, keyword density) and kept
//! intact; prose is split recursively on paragraph, sentence, then word
//! boundaries toward a target size with overlap between neighbors.
//!
//! Chunk boundaries are a pure function of the input text and the
//! configuration: the same page always yields the same chunks.

use pressrag::types::ChunkType;
use tracing::warn;

/// Minimum consecutive indented lines that count as a code block.
const INDENT_RUN_MIN_LINES: usize = 3;
/// Leading columns that mark a line as indented.
const INDENT_COLUMNS: usize = 4;
/// Fraction of tokens that must be language keywords for a paragraph to be
/// reclassified as code.
const KEYWORD_DENSITY_THRESHOLD: f64 = 0.18;

/// Prose splitter geometry.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub target_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chars: 1000,
            overlap_chars: 200,
        }
    }
}

/// One typed chunk produced from a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageChunk {
    pub content: String,
    pub chunk_type: ChunkType,
    pub language: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Segment {
    Prose(String),
    Code {
        text: String,
        language: Option<String>,
    },
}

/// Splits a page into typed chunks ready for embedding.
pub fn chunk_page(text: &str, config: &ChunkerConfig) -> Vec<PageChunk> {
    let mut chunks = Vec::new();
    for segment in split_segments(text) {
        match segment {
            Segment::Code { text, language } => {
                for piece in split_code(&text, config) {
                    chunks.push(PageChunk {
                        content: piece,
                        chunk_type: ChunkType::Code,
                        language: language.clone(),
                    });
                }
            }
            Segment::Prose(text) => {
                for piece in split_prose(&text, config) {
                    chunks.push(PageChunk {
                        content: piece,
                        chunk_type: ChunkType::Text,
                        language: None,
                    });
                }
            }
        }
    }
    chunks
}

/// Separates a page into prose and code segments.
///
/// Recognized code forms, in order of precedence:
/// 1. fenced blocks (``` ... ```), with an optional language tag;
/// 2. runs of at least [`INDENT_RUN_MIN_LINES`] lines indented by
///    [`INDENT_COLUMNS`] or more;
/// 3. paragraphs whose language-keyword density crosses the threshold.
fn split_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut prose_lines: Vec<&str> = Vec::new();
    let mut code_lines: Vec<&str> = Vec::new();
    let mut indent_lines: Vec<&str> = Vec::new();
    let mut in_fence = false;
    let mut fence_language: Option<String> = None;

    for line in text.lines() {
        if in_fence {
            if line.trim_start().starts_with("```") {
                flush_code(&mut segments, &mut code_lines, fence_language.take());
                in_fence = false;
            } else {
                code_lines.push(line);
            }
            continue;
        }

        if let Some(tag) = line.trim_start().strip_prefix("```") {
            flush_indent(&mut segments, &mut indent_lines, &mut prose_lines);
            flush_prose(&mut segments, &mut prose_lines);
            in_fence = true;
            let tag = tag.trim();
            fence_language = if tag.is_empty() {
                None
            } else {
                Some(tag.to_lowercase())
            };
            continue;
        }

        if is_indented(line) {
            indent_lines.push(line);
            continue;
        }

        if line.trim().is_empty() && !indent_lines.is_empty() {
            // A blank line inside an indent run does not break it yet; it
            // resolves with the next non-blank line.
            indent_lines.push(line);
            continue;
        }

        flush_indent(&mut segments, &mut indent_lines, &mut prose_lines);
        prose_lines.push(line);
    }

    if in_fence {
        // Unterminated fence at page end still counts as code.
        warn!("unterminated code fence at end of page");
        flush_code(&mut segments, &mut code_lines, fence_language.take());
    }
    flush_indent(&mut segments, &mut indent_lines, &mut prose_lines);
    flush_prose(&mut segments, &mut prose_lines);

    segments
}

fn is_indented(line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    let mut columns = 0;
    for ch in line.chars() {
        match ch {
            ' ' => columns += 1,
            '\t' => columns += INDENT_COLUMNS,
            _ => break,
        }
    }
    columns >= INDENT_COLUMNS
}

fn flush_code(segments: &mut Vec<Segment>, lines: &mut Vec<&str>, language: Option<String>) {
    let text = lines.join("\n");
    lines.clear();
    if text.trim().is_empty() {
        return;
    }
    let language = language.or_else(|| detect_language(&text));
    segments.push(Segment::Code { text, language });
}

fn flush_indent<'a>(
    segments: &mut Vec<Segment>,
    indent_lines: &mut Vec<&'a str>,
    prose_lines: &mut Vec<&'a str>,
) {
    while indent_lines.last().is_some_and(|l| l.trim().is_empty()) {
        indent_lines.pop();
    }
    if indent_lines.is_empty() {
        return;
    }
    if indent_lines.iter().filter(|l| !l.trim().is_empty()).count() >= INDENT_RUN_MIN_LINES {
        let mut lines = std::mem::take(indent_lines);
        flush_prose(segments, prose_lines);
        flush_code(segments, &mut lines, None);
    } else {
        // Too short to be a block; fold back into the surrounding prose.
        prose_lines.append(indent_lines);
    }
}

fn flush_prose(segments: &mut Vec<Segment>, lines: &mut Vec<&str>) {
    let text = lines.join("\n");
    lines.clear();
    if text.trim().is_empty() {
        return;
    }
    // A prose block dense with language keywords is code that lost its
    // layout in extraction.
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if keyword_density(paragraph) >= KEYWORD_DENSITY_THRESHOLD {
            segments.push(Segment::Code {
                text: paragraph.to_string(),
                language: detect_language(paragraph),
            });
        } else {
            match segments.last_mut() {
                Some(Segment::Prose(existing)) => {
                    existing.push_str("\n\n");
                    existing.push_str(paragraph);
                }
                _ => segments.push(Segment::Prose(paragraph.to_string())),
            }
        }
    }
}

/// Small per-language keyword tables for labeling and density scoring. The
/// corpus skews toward IBM-midrange material, so RPG and CL sit beside the
/// usual suspects.
const LANGUAGE_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "sql",
        &[
            "select", "insert", "update", "delete", "from", "where", "join", "group", "order",
            "having", "declare", "cursor",
        ],
    ),
    (
        "rpg",
        &[
            "dcl-s", "dcl-f", "dcl-proc", "dcl-ds", "eval", "chain", "setll", "readc", "exfmt",
            "begsr", "endsr", "*inlr", "exsr", "monitor",
        ],
    ),
    (
        "cl",
        &[
            "pgm", "endpgm", "dcl", "chgvar", "sndpgmmsg", "rtvjoba", "monmsg", "crtpf", "dltf",
        ],
    ),
    (
        "java",
        &[
            "public", "private", "class", "void", "static", "import", "extends", "implements",
            "new", "return",
        ],
    ),
    (
        "python",
        &["def", "import", "self", "return", "class", "elif", "none", "print"],
    ),
];

/// Fraction of whitespace-separated tokens that are language keywords or
/// code punctuation.
fn keyword_density(text: &str) -> f64 {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 5 {
        return 0.0;
    }
    let hits = tokens
        .iter()
        .filter(|token| {
            let token = token.trim_matches(|c: char| c == '(' || c == ')' || c == ',');
            let lowered = token.to_lowercase();
            let lowered = lowered.trim_end_matches(';');
            LANGUAGE_KEYWORDS
                .iter()
                .any(|(_, keywords)| keywords.contains(&lowered))
                || token.ends_with(';')
                || token.contains("()")
                || token.contains("::")
        })
        .count();
    hits as f64 / tokens.len() as f64
}

/// Guesses a language label for a code block: the table entry with the most
/// keyword hits, requiring at least two.
fn detect_language(code: &str) -> Option<String> {
    let lowered = code.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')' || c == ';' || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    let mut best: Option<(&str, usize)> = None;
    for (language, keywords) in LANGUAGE_KEYWORDS {
        let hits = tokens.iter().filter(|t| keywords.contains(*t)).count();
        if hits >= 2 && best.is_none_or(|(_, b)| hits > b) {
            best = Some((language, hits));
        }
    }
    best.map(|(language, _)| language.to_string())
}

/// Splits an oversized code block on line boundaries only, so no token is
/// ever cut. Blocks at or under twice the target stay whole.
fn split_code(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let limit = config.target_chars * 2;
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if !current.is_empty() && current.chars().count() + 1 + line.chars().count() > limit {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Recursive prose splitter: paragraphs, then sentences, then words, packed
/// toward the target size with an overlap tail carried between neighbors.
fn split_prose(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let target = config.target_chars.max(1);

    // Break into units no larger than the target.
    let mut units: Vec<String> = Vec::new();
    for paragraph in text.split("\n\n") {
        let paragraph = normalize_whitespace(paragraph);
        if paragraph.is_empty() {
            continue;
        }
        if paragraph.chars().count() <= target {
            units.push(paragraph);
            continue;
        }
        for sentence in split_sentences(&paragraph) {
            if sentence.chars().count() <= target {
                units.push(sentence.to_string());
            } else {
                units.extend(split_words(sentence, target));
            }
        }
    }

    // Pack units into chunks, carrying an overlap tail across boundaries.
    let mut chunks = Vec::new();
    let mut current = String::new();
    for unit in units {
        if !current.is_empty() && current.chars().count() + 1 + unit.chars().count() > target {
            let tail = overlap_tail(&current, config.overlap_chars);
            chunks.push(std::mem::take(&mut current));
            current = tail;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&unit);
    }
    let current = current.trim();
    if !current.is_empty() {
        chunks.push(current.to_string());
    }
    chunks
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits on sentence terminators followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminator = false;
    for (idx, ch) in text.char_indices() {
        if prev_terminator && ch.is_whitespace() {
            let sentence = text[start..idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx;
        }
        prev_terminator = matches!(ch, '.' | '!' | '?');
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Packs words into windows of at most `target` characters.
fn split_words(text: &str, target: usize) -> Vec<String> {
    let mut windows = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > target {
            windows.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        windows.push(current);
    }
    windows
}

/// The last `overlap` characters of a chunk, advanced to the next word
/// boundary so the carried context never starts mid-word.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= overlap {
        return text.to_string();
    }
    let tail: String = chars[chars.len() - overlap..].iter().collect();
    match tail.find(' ') {
        Some(pos) => tail[pos + 1..].to_string(),
        None => tail,
    }
}
