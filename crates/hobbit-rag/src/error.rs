//! Error types for indexing and search.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur while indexing or searching.
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing or invalid configuration (endpoint, credentials, sizes).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Vector length disagrees with the configured embedding dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Transient transport failure (timeout, connection reset, 429, 5xx).
    #[error("Network error: {0}")]
    Network(String),

    /// Permanent provider failure that retrying will not fix.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The provider rejected our credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The embedding model refused the content (unsupported or oversized).
    #[error("Model rejected input: {0}")]
    ModelRejected(String),

    /// A file could not be read.
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure while processing a single corpus file.
    #[error("Failed to index {path}: {source}")]
    File {
        path: String,
        #[source]
        source: Box<RagError>,
    },

    /// Failure while committing a batch.
    #[error("Batch {batch} (file offset {offset}) failed: {source}")]
    Batch {
        batch: usize,
        offset: usize,
        #[source]
        source: Box<RagError>,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled after {committed_batches} committed batches")]
    Cancelled { committed_batches: usize },

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RagError {
    /// Wrap an error with the path of the file being processed.
    pub fn in_file(self, path: impl Into<String>) -> Self {
        RagError::File {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// Wrap an error with the batch index and the offset of its first file.
    pub fn in_batch(self, batch: usize, offset: usize) -> Self {
        RagError::Batch {
            batch,
            offset,
            source: Box::new(self),
        }
    }

    /// The innermost error, with context wrappers removed.
    pub fn root_cause(&self) -> &RagError {
        match self {
            RagError::File { source, .. } | RagError::Batch { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Only transient network errors are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), RagError::Network(_))
    }

    /// Whether the error must abort an indexing run regardless of failure policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root_cause(),
            RagError::Config(_)
                | RagError::DimensionMismatch { .. }
                | RagError::Auth(_)
                | RagError::Cancelled { .. }
        )
    }
}

impl From<reqwest::Error> for RagError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            RagError::Network(e.to_string())
        } else if e.is_decode() {
            RagError::Serialization(e.to_string())
        } else {
            RagError::Provider(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagError::DimensionMismatch {
            expected: 1536,
            actual: 768,
        };
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 1536, got 768"
        );

        let err = RagError::Io {
            path: PathBuf::from("docs/a.md"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("docs/a.md"));
    }

    #[test]
    fn test_context_wrappers_keep_root_cause() {
        let err = RagError::Network("timed out".to_string())
            .in_file("src/a.cs")
            .in_batch(2, 100);

        assert!(err.to_string().contains("Batch 2"));
        assert!(err.to_string().contains("offset 100"));
        assert!(matches!(err.root_cause(), RagError::Network(_)));
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_classification() {
        assert!(RagError::Auth("401".into()).is_fatal());
        assert!(RagError::Config("missing key".into()).is_fatal());
        assert!(RagError::Cancelled { committed_batches: 1 }.is_fatal());
        assert!(!RagError::ModelRejected("too long".into()).is_fatal());
        assert!(!RagError::Provider("400".into()).is_retryable());
    }
}
