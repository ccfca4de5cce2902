//! Error types for Folio.
//!
//! The taxonomy separates three kinds of failure:
//! - setup mistakes (`InvalidConfiguration`, `DimensionMismatch`) which are fatal
//!   and never retried,
//! - infrastructure failures of the external services (`EmbeddingService`,
//!   `GenerationService`) which may be retried and are surfaced as
//!   "service unavailable",
//! - local storage and input problems.
//!
//! Refusing to answer for lack of evidence is not an error and has no variant here.

use thiserror::Error;

/// Unified error type for Folio.
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad chunking, retrieval or provider parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The embedding service failed, timed out or was cancelled
    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    /// The generation service failed, timed out or was cancelled
    #[error("Generation service error: {0}")]
    GenerationService(String),

    /// Vector size differs from the index dimension (index/model version skew)
    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The inbound question cannot be processed
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Missing, corrupt or unwritable persisted index
    #[error("Index error: {0}")]
    Index(String),

    /// Prompt definition or rendering errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Whether a failed call may be attempted again.
    ///
    /// Only external service failures qualify; configuration and dimension
    /// errors are programming/setup errors and fail the request immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingService(_) | Self::GenerationService(_))
    }

    /// Whether the front end should present this as "service down, retry later".
    pub fn is_service_unavailable(&self) -> bool {
        self.is_retryable()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_errors_are_retryable() {
        assert!(AppError::EmbeddingService("timeout".to_string()).is_retryable());
        assert!(AppError::GenerationService("503".to_string()).is_retryable());
    }

    #[test]
    fn test_setup_errors_are_not_retryable() {
        assert!(!AppError::InvalidConfiguration("overlap".to_string()).is_retryable());
        assert!(!AppError::DimensionMismatch {
            expected: 384,
            actual: 768
        }
        .is_retryable());
        assert!(!AppError::InvalidQuery("empty".to_string()).is_service_unavailable());
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = AppError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: index expects 384, got 768"
        );
    }
}
