//! # Application Configuration
//!
//! Configuration for the retrieval and ingestion pipeline, loaded in layers:
//! built-in defaults, then an optional `pressrag.yml`, then environment
//! variables prefixed with `PRESSRAG_` (double underscore as the nesting
//! separator, e.g. `PRESSRAG_RETRIEVAL__MAX_SOURCES=8`).

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::warn;

/// A custom error type for configuration issues.
#[derive(Debug)]
pub enum ConfigError {
    /// Indicates an error from the underlying `config` crate.
    General(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::General(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::General(err.to_string())
    }
}

/// The root configuration structure, mapping directly to `pressrag.yml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// The path to the SQLite database file.
    #[serde(default = "default_db_url")]
    pub db_url: String,
    /// Configuration for the text embedding model.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Configuration for the answer-generation LLM.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Ingestion-side knobs (chunk geometry, upload limit, OCR).
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Retrieval-side knobs (candidate pool, thresholds, context budget).
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

fn default_db_url() -> String {
    "db/pressrag.db".to_string()
}

/// Configuration for the embedding model provider.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_api_url")]
    pub api_url: String,
    #[serde(default = "default_embedding_model")]
    pub model_name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Declared vector dimension; enforced on every write.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Maximum number of inputs per embedding API call.
    #[serde(default = "default_embedding_max_batch")]
    pub max_batch: usize,
    /// Maximum number of in-flight embedding API calls.
    #[serde(default = "default_embedding_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_embedding_api_url() -> String {
    "http://localhost:8080/v1/embeddings".to_string()
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_embedding_dimension() -> usize {
    384
}
fn default_embedding_max_batch() -> usize {
    64
}
fn default_embedding_max_concurrency() -> usize {
    4
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: default_embedding_api_url(),
            model_name: default_embedding_model(),
            api_key: None,
            dimension: default_embedding_dimension(),
            max_batch: default_embedding_max_batch(),
            max_concurrency: default_embedding_max_concurrency(),
        }
    }
}

/// Configuration for the chat-completion provider used by the answerer.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: i32,
}

fn default_llm_api_url() -> String {
    "http://localhost:8080/v1/chat/completions".to_string()
}
fn default_llm_temperature() -> f32 {
    0.1
}
fn default_llm_max_tokens() -> i32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_llm_api_url(),
            api_key: None,
            model_name: None,
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

/// Ingestion-side configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Target size of a prose chunk, in characters.
    #[serde(default = "default_chunk_target_chars")]
    pub chunk_target_chars: usize,
    /// Character overlap between consecutive prose chunks.
    #[serde(default = "default_chunk_overlap_chars")]
    pub chunk_overlap_chars: usize,
    /// Uploads larger than this are rejected before extraction.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Toggles image-chunk emission via OCR.
    #[serde(default = "default_ocr_enabled")]
    pub ocr_enabled: bool,
}

fn default_chunk_target_chars() -> usize {
    1000
}
fn default_chunk_overlap_chars() -> usize {
    200
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_ocr_enabled() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_target_chars: default_chunk_target_chars(),
            chunk_overlap_chars: default_chunk_overlap_chars(),
            max_upload_bytes: default_max_upload_bytes(),
            ocr_enabled: default_ocr_enabled(),
        }
    }
}

/// Retrieval-side configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Wide candidate pool size fetched before filtering.
    #[serde(default = "default_initial_candidates")]
    pub initial_candidates: u32,
    /// Final cap on enriched sources per answer.
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    /// Default cosine-distance ceiling for admission.
    #[serde(default = "default_distance_ceiling")]
    pub distance_ceiling: f64,
    /// Hard upper bound the ceiling can never be relaxed beyond.
    #[serde(default = "default_distance_ceiling_hard_max")]
    pub distance_ceiling_hard_max: f64,
    /// Total passage characters allowed in the prompt.
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,
}

fn default_initial_candidates() -> u32 {
    30
}
fn default_max_sources() -> usize {
    12
}
fn default_distance_ceiling() -> f64 {
    0.50
}
fn default_distance_ceiling_hard_max() -> f64 {
    0.65
}
fn default_context_char_budget() -> usize {
    12_000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            initial_candidates: default_initial_candidates(),
            max_sources: default_max_sources(),
            distance_ceiling: default_distance_ceiling(),
            distance_ceiling_hard_max: default_distance_ceiling_hard_max(),
            context_char_budget: default_context_char_budget(),
        }
    }
}

impl RetrievalConfig {
    /// Clamps the configured ceiling to the hard maximum. The hard max is a
    /// safety property, not a knob: no configuration may raise the default
    /// ceiling above it.
    pub fn clamp_ceiling(&mut self) {
        if self.distance_ceiling > self.distance_ceiling_hard_max {
            warn!(
                configured = self.distance_ceiling,
                hard_max = self.distance_ceiling_hard_max,
                "distance_ceiling exceeds the hard maximum; clamping"
            );
            self.distance_ceiling = self.distance_ceiling_hard_max;
        }
    }
}

impl AppConfig {
    /// Loads the configuration: defaults, then `pressrag.yml` if present,
    /// then `PRESSRAG_`-prefixed environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("pressrag.yml")
    }

    /// Loads the configuration from an explicit file path (used by tests).
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let builder = ConfigBuilder::builder()
            .add_source(File::new(path, FileFormat::Yaml).required(false))
            .add_source(Environment::with_prefix("PRESSRAG").separator("__"))
            .build()?;

        let mut app_config: AppConfig = builder.try_deserialize()?;
        app_config.retrieval.clamp_ceiling();
        Ok(app_config)
    }
}
