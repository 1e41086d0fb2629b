//! Error types for the similarity-search data plane

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the data plane
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    /// A shard, cache or index backend could not be reached
    #[error("Upstream {target} unavailable: {reason}")]
    UpstreamUnavailable { target: String, reason: String },

    /// Every shard failed, so no merge is possible
    #[error("All {attempted} shards unavailable")]
    AllShardsUnavailable { attempted: usize },

    /// Foreground operation exceeded its deadline with nothing to return
    #[error("Operation {operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    // =========================================================================
    // Vector / Index Errors
    // =========================================================================
    /// Vector has the wrong dimension for this deployment
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector cannot be normalized (zero norm, NaN or infinity)
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// Index was used before it was built
    #[error("Index not built: {0}")]
    IndexNotBuilt(String),

    /// Index inputs are inconsistent
    #[error("Invalid index input: {0}")]
    InvalidIndex(String),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },
}

impl Error {
    /// Shorthand for an unreachable upstream
    pub fn upstream(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::UpstreamUnavailable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the error means a backend could not be reached
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable { .. }
                | Error::AllShardsUnavailable { .. }
                | Error::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_helper() {
        let err = Error::upstream("shard-2", "connection refused");
        assert!(err.is_upstream());
        assert_eq!(
            err.to_string(),
            "Upstream shard-2 unavailable: connection refused"
        );
    }

    #[test]
    fn test_non_upstream_errors() {
        let err = Error::DimensionMismatch {
            expected: 512,
            actual: 3,
        };
        assert!(!err.is_upstream());
        assert!(err.to_string().contains("expected 512"));
    }
}
