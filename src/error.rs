//! Error types for the context budget engine

use crate::cache::CacheError;
use crate::context::summarizer::SummarizerError;
use crate::context::token_estimator::TokenizerError;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ContextError>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Invalid capacity: {capacity} (must be greater than zero)")]
    InvalidCapacity { capacity: usize },

    #[error("Compaction failed: {0}")]
    CompactionFailed(#[source] SummarizerError),

    #[error("Summarization timed out after {timeout:?}")]
    SummarizationTimeout { timeout: Duration },

    #[error("Cache key not found: {0}")]
    KeyNotFound(String),

    #[error("Section '{section}' not found in cache entry {key}")]
    SectionNotFound { key: String, section: String },

    #[error("Tokenization failed: {0}")]
    TokenizationFailed(#[from] TokenizerError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl ContextError {
    /// Whether the error left the caller's history untouched because the
    /// summarizer could not produce a result
    pub fn is_compaction_failure(&self) -> bool {
        matches!(
            self,
            ContextError::CompactionFailed(_) | ContextError::SummarizationTimeout { .. }
        )
    }
}

impl From<CacheError> for ContextError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::KeyNotFound(key) => ContextError::KeyNotFound(key),
            CacheError::SectionNotFound { key, section } => {
                ContextError::SectionNotFound { key, section }
            }
        }
    }
}

impl From<SummarizerError> for ContextError {
    fn from(err: SummarizerError) -> Self {
        match err {
            SummarizerError::Timeout(timeout) => ContextError::SummarizationTimeout { timeout },
            other => ContextError::CompactionFailed(other),
        }
    }
}

impl From<std::io::Error> for ContextError {
    fn from(err: std::io::Error) -> Self {
        ContextError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(err: serde_json::Error) -> Self {
        ContextError::Persistence(err.to_string())
    }
}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_conversion() {
        let err: ContextError = CacheError::KeyNotFound("abc".to_string()).into();
        assert!(matches!(err, ContextError::KeyNotFound(ref k) if k == "abc"));

        let err: ContextError = CacheError::SectionNotFound {
            key: "abc".to_string(),
            section: "install".to_string(),
        }
        .into();
        assert!(matches!(err, ContextError::SectionNotFound { .. }));
    }

    #[test]
    fn test_every_variant_reachable_from_a_source_error() {
        let errors: Vec<ContextError> = vec![
            ContextError::InvalidCapacity { capacity: 0 },
            SummarizerError::Unknown.into(),
            SummarizerError::Timeout(Duration::from_secs(1)).into(),
            CacheError::KeyNotFound("k".to_string()).into(),
            CacheError::SectionNotFound {
                key: "k".to_string(),
                section: "s".to_string(),
            }
            .into(),
            TokenizerError::Encoding("bad input".to_string()).into(),
            ContextError::Configuration("threshold".to_string()),
            std::io::Error::new(std::io::ErrorKind::Other, "disk full").into(),
        ];

        for err in errors {
            let prefix = match &err {
                ContextError::InvalidCapacity { .. } => "Invalid capacity",
                ContextError::CompactionFailed(_) => "Compaction failed",
                ContextError::SummarizationTimeout { .. } => "Summarization timed out",
                ContextError::KeyNotFound(_) => "Cache key not found",
                ContextError::SectionNotFound { .. } => "Section 's'",
                ContextError::TokenizationFailed(_) => "Tokenization failed",
                ContextError::Configuration(_) => "Configuration error",
                ContextError::Persistence(_) => "Persistence error",
            };
            assert!(err.to_string().starts_with(prefix), "{}", err);
        }
    }

    #[test]
    fn test_summarizer_timeout_maps_to_timeout() {
        let err: ContextError = SummarizerError::Timeout(Duration::from_secs(3)).into();
        assert!(matches!(err, ContextError::SummarizationTimeout { .. }));
        assert!(err.is_compaction_failure());

        let err: ContextError = SummarizerError::ApiError("HTTP 500".to_string()).into();
        assert!(matches!(err, ContextError::CompactionFailed(_)));
        assert!(err.is_compaction_failure());
    }
}
