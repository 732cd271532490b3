//! Error types shared across the ingestion pipeline.

use thiserror::Error;

/// Result type alias using RasterError.
pub type RasterResult<T> = Result<T, RasterError>;

/// Primary error type for ingestion operations.
#[derive(Debug, Error)]
pub enum RasterError {
    // === Resolution Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // === Source Data Errors ===
    #[error("Format error: {0}")]
    FormatError(String),

    #[error("Expression error: {0}")]
    ExpressionError(String),

    #[error("Geometry error: {0}")]
    GeometryError(String),

    // === Infrastructure Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Lock contention: {0}")]
    LockContention(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RasterError {
    /// Whether a worker that hit this error should leave the file eligible
    /// for retry. Lock contention is not a failure at all; everything else
    /// is retryable up to the ingestion log's retry limit.
    pub fn is_contention(&self) -> bool {
        matches!(self, RasterError::LockContention(_))
    }
}

// Conversion from common error types
impl From<std::io::Error> for RasterError {
    fn from(err: std::io::Error) -> Self {
        RasterError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for RasterError {
    fn from(err: serde_json::Error) -> Self {
        RasterError::InternalError(format!("JSON error: {}", err))
    }
}
