use common_s3::S3Error;
use thiserror::Error;

/// Errors produced anywhere in the artifact pipeline.
///
/// Batch operations never return these for individual items; they are folded
/// into the batch outcome instead. Only `Config` (and a failed archive upload)
/// abort a whole call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found (attempted: {})", .attempted.join(", "))]
    NotFound { attempted: Vec<String> },
    #[error("conversion failed: {0}")]
    ConversionFailed(String),
    #[error("transient io error: {0}")]
    TransientIo(String),
    #[error("no processable items: {0}")]
    CapacityExceeded(String),
    #[error("cancelled before start")]
    Cancelled,
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn not_found(key: impl Into<String>) -> Self {
        PipelineError::NotFound {
            attempted: vec![key.into()],
        }
    }

    /// Short stable label, used for metrics and in batch reports
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidArgument(_) => "invalid_argument",
            PipelineError::NotFound { .. } => "not_found",
            PipelineError::ConversionFailed(_) => "conversion_failed",
            PipelineError::TransientIo(_) => "transient_io",
            PipelineError::CapacityExceeded(_) => "capacity_exceeded",
            PipelineError::Cancelled => "cancelled",
            PipelineError::WorkerPanicked(_) => "worker_panicked",
            PipelineError::Config(_) => "config",
        }
    }

    /// Human readable reason recorded against a failed batch item
    pub fn reason(&self) -> String {
        match self {
            PipelineError::NotFound { .. } => "not found".to_string(),
            other => other.to_string(),
        }
    }

    /// Keys that were tried before giving up, if this is a lookup failure
    pub fn attempted_keys(&self) -> &[String] {
        match self {
            PipelineError::NotFound { attempted } => attempted,
            _ => &[],
        }
    }
}

impl From<S3Error> for PipelineError {
    fn from(err: S3Error) -> Self {
        match err {
            S3Error::NotFound(key) => PipelineError::not_found(key),
            S3Error::OperationFailed(msg) => PipelineError::TransientIo(msg),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PipelineError::NotFound { attempted: vec![] },
            other => PipelineError::TransientIo(format!("database error: {other}")),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::TransientIo(format!("request failed: {err}"))
    }
}
