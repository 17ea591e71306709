use thiserror::Error;

/// Errors produced by the HTTP-backed AI providers (embeddings and chat).
#[derive(Error, Debug)]
pub enum AiError {
    #[error("Failed to build Reqwest client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("Failed to send request to the AI provider: {0}")]
    Request(reqwest::Error),
    #[error("Failed to deserialize AI provider response: {0}")]
    Deserialization(reqwest::Error),
    #[error("AI provider returned an error: {0}")]
    Api(String),
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// The error taxonomy of the core pipeline.
///
/// Every failure that crosses a component boundary is expressed as one of
/// these kinds. The `kind()` string is the stable identifier carried by an
/// `error` chat event; callers outside the core map it to their own
/// protocol-level responses.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("upload of {size} bytes exceeds the configured limit of {limit}")]
    IngestTooLarge { size: usize, limit: usize },
    #[error("ingestion of '{0}' produced no chunks")]
    IngestEmpty(String),
    #[error("failed to parse document: {0}")]
    IngestParseFailed(String),
    #[error("indexing failed: {0}")]
    IndexFailed(String),
    #[error("retrieval failed: {0}")]
    RetrieveFailed(String),
    #[error("no bibliographic record matches '{0}'")]
    EnrichmentMissing(String),
    #[error("LLM provider unavailable: {0}")]
    LlmUnavailable(String),
    #[error("LLM call exceeded its deadline")]
    LlmTimeout,
    #[error("LLM stream aborted: {0}")]
    LlmStreamAborted(String),
    #[error("bibliographic constraint violated: {0}")]
    ConstraintViolation(String),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("deadline expired")]
    Timeout,
    #[error("An unexpected internal error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RagError {
    /// Stable identifier for the `kind` field of an `error` chat event.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::IngestTooLarge { .. } => "IngestTooLarge",
            RagError::IngestEmpty(_) => "IngestEmpty",
            RagError::IngestParseFailed(_) => "IngestParseFailed",
            RagError::IndexFailed(_) => "IndexFailed",
            RagError::RetrieveFailed(_) => "RetrieveFailed",
            RagError::EnrichmentMissing(_) => "EnrichmentMissing",
            RagError::LlmUnavailable(_) => "LLMUnavailable",
            RagError::LlmTimeout => "LLMTimeout",
            RagError::LlmStreamAborted(_) => "LLMStreamAborted",
            RagError::ConstraintViolation(_) => "ConstraintViolation",
            RagError::Cancelled => "Cancelled",
            RagError::Timeout => "Timeout",
            RagError::Internal(_) => "Internal",
        }
    }
}

impl From<turso::Error> for RagError {
    fn from(err: turso::Error) -> Self {
        RagError::Internal(anyhow::anyhow!("database error: {err}"))
    }
}
