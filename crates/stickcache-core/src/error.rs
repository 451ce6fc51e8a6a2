//! Error types for the offline cache engine.
//!
//! Every failure the engine can surface is a variant of [`CacheError`]. The
//! enum is `Clone` because one in-flight fetch outcome is handed to every
//! caller that joined it.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::GenerationId;

/// Main error type for the cache engine.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    // Origin errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// HTTP-like status when the origin answered with one.
        status: Option<u16>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // Storage errors
    #[error("Quota exceeded writing {key}: {size_bytes} bytes does not fit in {quota_bytes}")]
    QuotaExceeded {
        key: String,
        size_bytes: u64,
        quota_bytes: u64,
    },

    #[error("Generation not found: {0}")]
    GenerationNotFound(GenerationId),

    // Versioning errors
    #[error("Failed to fetch critical resource {key}: {message}")]
    ManifestFetch { key: String, message: String },

    #[error("Activation of generation {generation} aborted: {reason}")]
    ActivationAborted {
        generation: GenerationId,
        reason: Box<CacheError>,
    },

    #[error("Invalid transition for generation {generation}: {from} -> {to}")]
    InvalidTransition {
        generation: GenerationId,
        from: String,
        to: String,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("JSON error: {message}")]
    Json { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for cache engine operations.
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Json {
            message: err.to_string(),
        }
    }
}

impl CacheError {
    /// Create a network error without a status code.
    pub fn network(message: impl Into<String>) -> Self {
        CacheError::Network {
            message: message.into(),
            status: None,
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CacheError::Io {
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Network { .. } | CacheError::Timeout(_))
    }

    /// Stable snake_case name used in telemetry events.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Network { .. } => "network",
            CacheError::Timeout(_) => "timeout",
            CacheError::QuotaExceeded { .. } => "quota_exceeded",
            CacheError::GenerationNotFound(_) => "generation_not_found",
            CacheError::ManifestFetch { .. } => "manifest_fetch",
            CacheError::ActivationAborted { .. } => "activation_aborted",
            CacheError::InvalidTransition { .. } => "invalid_transition",
            CacheError::Config { .. } => "config",
            CacheError::Io { .. } => "io",
            CacheError::Json { .. } => "json",
            CacheError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::QuotaExceeded {
            key: "/app.js".into(),
            size_bytes: 2048,
            quota_bytes: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Quota exceeded writing /app.js: 2048 bytes does not fit in 1024"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(CacheError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(CacheError::network("connection reset").is_retryable());
        assert!(!CacheError::ManifestFetch {
            key: "/index.html".into(),
            message: "404".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_activation_aborted_wraps_cause() {
        let err = CacheError::ActivationAborted {
            generation: GenerationId::from("abc123"),
            reason: Box::new(CacheError::ManifestFetch {
                key: "/app.js".into(),
                message: "offline".into(),
            }),
        };
        assert!(err.to_string().contains("/app.js"));
        assert_eq!(err.kind(), "activation_aborted");
    }
}
