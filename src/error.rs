//! Error taxonomy for the ingestion and retrieval pipelines.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ConstructionRagError>;

/// Top-level error type. Every fallible operation in this crate resolves to
/// one of these variants; `TransientError` is the only one a caller outside
/// `gateway` should never see, since the gateway retries it away.
#[derive(Error, Debug)]
pub enum ConstructionRagError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("transient error: {0}")]
    Transient(#[from] TransientError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("run exceeded its wall-clock budget: {0}")]
    Timeout(#[from] TimeoutError),

    #[error("quality gate failed: {0}")]
    QualityGate(#[from] QualityGateError),

    #[error("run not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Invalid or missing configuration, surfaced at Run start (spec §7).
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("unknown language {0:?}; expected \"english\" or \"danish\"")]
    UnknownLanguage(String),

    #[error("unknown chunking strategy {0:?}; expected adaptive, recursive or semantic")]
    UnknownChunkingStrategy(String),

    #[error("chunk_size must be positive, got {0}")]
    InvalidChunkSize(usize),

    #[error("overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { overlap: usize, chunk_size: usize },

    #[error("embedding.dimension must be positive, got {0}")]
    InvalidEmbeddingDimension(usize),

    #[error("embedding.batch_size must be positive, got {0}")]
    InvalidBatchSize(usize),

    #[error("retrieval.top_k must be in 1..=200, got {0}")]
    InvalidTopK(usize),

    #[error("retrieval.similarity_floor must be in [0.0, 1.0], got {0}")]
    InvalidSimilarityFloor(f32),

    #[error("a required model name is empty: {field}")]
    MissingModel { field: &'static str },

    #[error("failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },
}

/// The PDF cannot be read at all; the Run fails (spec §4.6 "Failures").
#[derive(Error, Debug, Clone)]
pub enum PartitionError {
    #[error("unreadable PDF at {path}: {reason}")]
    UnreadablePdf { path: String, reason: String },

    #[error("page {page} could not be rendered: {reason}")]
    RenderFailed { page: u32, reason: String },

    #[error("OCR backend failed: {0}")]
    OcrFailed(String),
}

/// Non-transient failure from an external model service; the current step
/// fails (spec §4.4, §7).
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("{service} returned client error {status}: {message}")]
    ClientError {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} response could not be decoded: {reason}")]
    InvalidResponse { service: &'static str, reason: String },

    #[error("all providers exhausted for {service}")]
    AllProvidersFailed { service: &'static str },
}

/// Retried with exponential backoff inside the Model Gateway; invisible to
/// the orchestrator on eventual success (spec §4.4, §7).
#[derive(Error, Debug, Clone)]
pub enum TransientError {
    #[error("{service} timed out after {elapsed_ms}ms")]
    Timeout { service: &'static str, elapsed_ms: u64 },

    #[error("{service} returned server error {status}")]
    ServerError { service: &'static str, status: u16 },

    #[error("{service} rate-limited the request")]
    RateLimited { service: &'static str },

    #[error("network error talking to {service}: {reason}")]
    Network { service: &'static str, reason: String },
}

/// Structured-output parsing failed after all fallback tiers (spec §4.13,
/// §9), surfaced by the Checklist Pipeline's query-generation and
/// structuring steps.
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("strict JSON parse failed: {0}")]
    Strict(String),

    #[error("no JSON object/array could be extracted from the response")]
    NoJsonFound,

    #[error("all {tiers} recovery tiers failed; last error: {last_error}")]
    AllTiersFailed { tiers: usize, last_error: String },
}

/// The Run exceeded its overall wall-clock budget (spec §5, §7).
#[derive(Error, Debug, Clone)]
#[error("run {run_id} exceeded its {budget_secs}s wall-clock budget")]
pub struct TimeoutError {
    pub run_id: uuid::Uuid,
    pub budget_secs: u64,
}

/// Too many chunks failed embedding, below the configured success ratio
/// (spec §4.10, §7).
#[derive(Error, Debug, Clone)]
#[error("only {succeeded}/{total} chunks embedded successfully, below the {min_ratio:.2} quality gate")]
pub struct QualityGateError {
    pub succeeded: usize,
    pub total: usize,
    pub min_ratio: f64,
}

impl ConstructionRagError {
    /// Whether the gateway should retry this error itself rather than
    /// surface it. In practice only `TransientError` and a handful of raw
    /// `reqwest`/`sqlx` transport failures qualify; everything else is a
    /// permanent failure of the current step.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConstructionRagError::Transient(_)
                | ConstructionRagError::Http(_)
                | ConstructionRagError::Database(sqlx::Error::PoolTimedOut)
                | ConstructionRagError::Database(sqlx::Error::Io(_))
        )
    }

    /// Error category tag used in structured logging and in the progress
    /// endpoint's sanitised failure message.
    pub fn category(&self) -> &'static str {
        match self {
            ConstructionRagError::Config(_) => "config",
            ConstructionRagError::Partition(_) => "partition",
            ConstructionRagError::Model(_) => "model",
            ConstructionRagError::Transient(_) => "transient",
            ConstructionRagError::Parse(_) => "parse",
            ConstructionRagError::Timeout(_) => "timeout",
            ConstructionRagError::QualityGate(_) => "quality_gate",
            ConstructionRagError::NotFound(_) => "not_found",
            ConstructionRagError::Io(_) => "io",
            ConstructionRagError::Serialization(_) => "serialization",
            ConstructionRagError::Http(_) => "http",
            ConstructionRagError::Database(_) => "database",
            ConstructionRagError::Generic(_) => "generic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        let err = ConstructionRagError::Transient(TransientError::RateLimited {
            service: "embedder",
        });
        assert!(err.is_retryable());
        assert_eq!(err.category(), "transient");
    }

    #[test]
    fn config_is_not_retryable() {
        let err = ConstructionRagError::Config(ConfigError::InvalidTopK(0));
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "config");
    }
}
