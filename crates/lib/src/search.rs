//! # Retrieval
//!
//! Given a natural-language question, produce a ranked, deduplicated,
//! threshold-filtered set of chunks. Candidates are ranked by cosine
//! distance in SQL; admission is adaptive in Rust: the query's shape picks
//! a distance ceiling and a minimum keep count, and the ceiling relaxes
//! stepwise (never past the hard maximum) until the minimum is met or the
//! candidate pool is exhausted.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};
use turso::Database;

use crate::biblio::{opt_int_value, real_value, text_value};
use crate::config::RetrievalConfig;
use crate::errors::RagError;
use crate::providers::ai::EmbeddingClient;
use crate::providers::db::sqlite::SqliteProvider;
use crate::types::{ChunkType, RetrievedChunk};

/// How far the ceiling moves per relaxation step.
const RELAX_STEP: f64 = 0.05;

/// The shape of an incoming query, used to pick an admission rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// A couple of bare terms, e.g. "subfile pagination".
    ShortKeyword,
    /// Mentions code constructs or language keywords.
    CodeOriented,
    /// "How do I ..." style procedural questions.
    Procedural,
    /// Everything else: a full natural-language question.
    NaturalQuestion,
}

/// Admission rule for one query shape: a distance ceiling and the minimum
/// number of chunks worth keeping before the ceiling starts to relax.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdRule {
    pub ceiling: f64,
    pub min_keep: usize,
}

static PROCEDURAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*how\s+(do|does|can|would|should|to)\b").expect("valid regex")
});

static CODE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
          \(\) | :: | -> | <- | = \s* ' |
          \b(select|insert|update|delete|exec\s+sql|sqlrpgle|rpgle|rpg|clle|
             dcl-s|dcl-f|dcl-proc|eval|chain|setll|readc|
             subfile|procedure|function|syntax|snippet|source\s+code)\b",
    )
    .expect("valid regex")
});

/// Classifies a query by shape. The rules are intentionally small and
/// ordered: code markers win over the procedural prefix, which wins over
/// the keyword heuristic.
pub fn classify_query(query: &str) -> QueryShape {
    let trimmed = query.trim();
    if CODE_MARKER_RE.is_match(trimmed) {
        return QueryShape::CodeOriented;
    }
    if PROCEDURAL_RE.is_match(trimmed) {
        return QueryShape::Procedural;
    }
    let words = trimmed.split_whitespace().count();
    if words <= 3 && !trimmed.ends_with('?') {
        return QueryShape::ShortKeyword;
    }
    QueryShape::NaturalQuestion
}

/// The declarative shape → rule table, anchored on the configured default
/// ceiling and clamped to the hard maximum.
pub fn rule_for_shape(shape: QueryShape, config: &RetrievalConfig) -> ThresholdRule {
    let hard_max = config.distance_ceiling_hard_max;
    let base = config.distance_ceiling.min(hard_max);
    let (ceiling, min_keep) = match shape {
        // Bare keywords match tightly or not at all; demand closeness.
        QueryShape::ShortKeyword => (base - 0.10, 3),
        QueryShape::CodeOriented => (base - 0.05, 3),
        // Procedural questions tolerate looser matches across steps.
        QueryShape::Procedural => (base + 0.05, 2),
        QueryShape::NaturalQuestion => (base, 2),
    };
    ThresholdRule {
        ceiling: ceiling.clamp(RELAX_STEP, hard_max),
        min_keep,
    }
}

/// Admits candidates below the ceiling, relaxing it stepwise up to (and
/// never beyond) the hard maximum until `min_keep` survive or the pool is
/// exhausted. Candidates must already be sorted by ascending distance.
pub fn apply_adaptive_threshold(
    candidates: &[RetrievedChunk],
    rule: ThresholdRule,
    hard_max: f64,
) -> Vec<RetrievedChunk> {
    let mut ceiling = rule.ceiling.min(hard_max);
    loop {
        let kept: Vec<RetrievedChunk> = candidates
            .iter()
            .filter(|c| c.distance <= ceiling)
            .cloned()
            .collect();
        if kept.len() >= rule.min_keep || ceiling >= hard_max {
            return kept;
        }
        ceiling = (ceiling + RELAX_STEP).min(hard_max);
    }
}

/// Collapses multiple admitted chunks from the same `(filename, page)` to
/// the single best-ranked representative. Input order (ascending distance)
/// is preserved.
pub fn dedup_by_page(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut seen: HashSet<(String, Option<i64>)> = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert((c.filename.clone(), c.page_number)))
        .collect()
}

/// Ranks and filters chunks for a query.
#[derive(Clone)]
pub struct Retriever {
    db: Database,
    embedder: EmbeddingClient,
    config: RetrievalConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever").finish_non_exhaustive()
    }
}

impl Retriever {
    pub fn new(
        provider: &SqliteProvider,
        embedder: EmbeddingClient,
        mut config: RetrievalConfig,
    ) -> Self {
        config.clamp_ceiling();
        Self {
            db: provider.db.clone(),
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieves chunks for a query with the configured pool and cap.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, RagError> {
        self.retrieve_with(
            query,
            self.config.initial_candidates,
            self.config.max_sources,
        )
        .await
    }

    /// Retrieves chunks with explicit pool and cap sizes.
    pub async fn retrieve_with(
        &self,
        query: &str,
        k_candidates: u32,
        max_sources: usize,
    ) -> Result<Vec<RetrievedChunk>, RagError> {
        let query_vector = self
            .embedder
            .embed_one(query)
            .await
            .map_err(|e| RagError::RetrieveFailed(e.to_string()))?;

        let candidates = self
            .fetch_candidates(&query_vector, k_candidates)
            .await
            .map_err(|e| RagError::RetrieveFailed(e.to_string()))?;

        let shape = classify_query(query);
        let rule = rule_for_shape(shape, &self.config);
        debug!(
            ?shape,
            ceiling = rule.ceiling,
            min_keep = rule.min_keep,
            pool = candidates.len(),
            "applying adaptive threshold"
        );

        let admitted = apply_adaptive_threshold(
            &candidates,
            rule,
            self.config.distance_ceiling_hard_max,
        );
        let mut results = dedup_by_page(admitted);
        results.truncate(max_sources);

        info!(
            query_len = query.len(),
            kept = results.len(),
            "retrieval finished"
        );
        Ok(results)
    }

    /// Fetches the wide candidate pool ordered by ascending cosine
    /// distance against the embedding column.
    async fn fetch_candidates(
        &self,
        query_vector: &[f32],
        limit: u32,
    ) -> Result<Vec<RetrievedChunk>, turso::Error> {
        let conn = self.db.connect()?;

        // Turso's vector functions expect the vector as a literal within
        // the query.
        let vector_str = format!(
            "vector32('[{}]')",
            query_vector
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let sql = format!(
            "SELECT filename, content, page_number, metadata,
                    vector_distance_cos(embedding, {vector_str}) AS distance
             FROM chunks
             WHERE embedding IS NOT NULL
             ORDER BY distance ASC
             LIMIT {limit};"
        );

        let mut rows = conn.query(&sql, ()).await?;
        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await? {
            let metadata = text_value(row.get_value(3)?);
            candidates.push(RetrievedChunk {
                filename: text_value(row.get_value(0)?),
                content: text_value(row.get_value(1)?),
                page_number: opt_int_value(row.get_value(2)?),
                chunk_type: chunk_type_from_metadata(&metadata),
                distance: real_value(row.get_value(4)?),
            });
        }
        Ok(candidates)
    }
}

/// Reads the chunk type out of the persisted metadata JSON, defaulting to
/// `text` when the field is absent or malformed.
fn chunk_type_from_metadata(metadata: &str) -> ChunkType {
    serde_json::from_str::<serde_json::Value>(metadata)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| match t {
            "code" => ChunkType::Code,
            "image" => ChunkType::Image,
            _ => ChunkType::Text,
        }))
        .unwrap_or(ChunkType::Text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(filename: &str, page: Option<i64>, distance: f64) -> RetrievedChunk {
        RetrievedChunk {
            filename: filename.to_string(),
            content: String::new(),
            page_number: page,
            chunk_type: ChunkType::Text,
            distance,
        }
    }

    #[test]
    fn classifies_query_shapes() {
        assert_eq!(classify_query("DB2 cost savings"), QueryShape::ShortKeyword);
        assert_eq!(
            classify_query("How do I define a subfile in RPG?"),
            QueryShape::CodeOriented
        );
        assert_eq!(
            classify_query("How do I get started with the platform?"),
            QueryShape::Procedural
        );
        assert_eq!(
            classify_query("What were the licensing changes announced last year?"),
            QueryShape::NaturalQuestion
        );
    }

    #[test]
    fn threshold_admits_close_matches_only() {
        let candidates = vec![
            chunk("a.pdf", Some(1), 0.15),
            chunk("b.pdf", Some(2), 0.20),
            chunk("c.pdf", Some(3), 0.25),
            chunk("d.pdf", Some(4), 0.92),
        ];
        let rule = ThresholdRule {
            ceiling: 0.40,
            min_keep: 2,
        };
        let kept = apply_adaptive_threshold(&candidates, rule, 0.65);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|c| c.distance < 0.30));
    }

    #[test]
    fn threshold_relaxes_until_min_keep() {
        let candidates = vec![
            chunk("a.pdf", Some(1), 0.42),
            chunk("b.pdf", Some(2), 0.55),
            chunk("c.pdf", Some(3), 0.61),
        ];
        let rule = ThresholdRule {
            ceiling: 0.35,
            min_keep: 3,
        };
        let kept = apply_adaptive_threshold(&candidates, rule, 0.65);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn threshold_never_relaxes_past_hard_max() {
        let candidates = vec![
            chunk("a.pdf", Some(1), 0.42),
            chunk("b.pdf", Some(2), 0.90),
            chunk("c.pdf", Some(3), 0.95),
        ];
        let rule = ThresholdRule {
            ceiling: 0.35,
            min_keep: 3,
        };
        let kept = apply_adaptive_threshold(&candidates, rule, 0.65);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].distance, 0.42);
    }

    #[test]
    fn rule_table_respects_hard_max() {
        let config = RetrievalConfig {
            distance_ceiling: 0.65,
            distance_ceiling_hard_max: 0.65,
            ..Default::default()
        };
        for shape in [
            QueryShape::ShortKeyword,
            QueryShape::CodeOriented,
            QueryShape::Procedural,
            QueryShape::NaturalQuestion,
        ] {
            let rule = rule_for_shape(shape, &config);
            assert!(rule.ceiling <= config.distance_ceiling_hard_max);
        }
    }

    #[test]
    fn dedup_keeps_best_ranked_per_page() {
        let chunks = vec![
            chunk("a.pdf", Some(1), 0.10),
            chunk("a.pdf", Some(1), 0.20),
            chunk("a.pdf", Some(2), 0.30),
            chunk("b.pdf", Some(1), 0.40),
        ];
        let deduped = dedup_by_page(chunks);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0].distance, 0.10);
    }

    #[test]
    fn missing_page_numbers_dedup_per_filename() {
        let chunks = vec![
            chunk("a.pdf", None, 0.10),
            chunk("a.pdf", None, 0.20),
            chunk("b.pdf", None, 0.30),
        ];
        assert_eq!(dedup_by_page(chunks).len(), 2);
    }
}
