//! Embedding client trait and implementations.
//!
//! This module defines the abstraction over embedding providers consumed by
//! the indexing pipeline and the search service, the shared retry helper for
//! HTTP-backed collaborators, and a deterministic mock for testing.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{RagError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures, throttling, 5xx).
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    provider: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    provider = provider,
                    attempt = attempt,
                    max_retries = max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Trait for embedding providers.
///
/// Implementations convert raw content into a vector of exactly `dimension`
/// floats. They must never truncate, pad, or substitute another model: a
/// vector of the wrong length is reported as
/// [`RagError::DimensionMismatch`].
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate an embedding for `content`.
    async fn generate_embedding(&self, content: &[u8], dimension: usize) -> Result<Vec<f32>>;

    /// Get the name of this provider.
    fn name(&self) -> &str;
}

/// An embedding client that can be shared across tasks.
pub type SharedEmbedder = Arc<dyn EmbeddingClient>;

/// Check a provider-returned vector against the requested dimension.
pub fn check_dimension(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(RagError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// A deterministic embedder for tests and offline runs.
///
/// Vectors are derived from a SHA-256 stream over the content, so identical
/// content always embeds identically and distinct content almost never
/// collides.
#[derive(Debug, Default)]
pub struct MockEmbedder {
    reject_marker: Option<Vec<u8>>,
    forced_dimension: Option<usize>,
    request_log: Mutex<Vec<Vec<u8>>>,
}

impl MockEmbedder {
    /// Create a mock embedder that accepts all content.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared instance.
    pub fn shared() -> SharedEmbedder {
        Arc::new(Self::new())
    }

    /// Reject any content containing `marker` with [`RagError::ModelRejected`].
    pub fn rejecting(mut self, marker: impl AsRef<[u8]>) -> Self {
        self.reject_marker = Some(marker.as_ref().to_vec());
        self
    }

    /// Always return vectors of `dimension` regardless of what was requested.
    pub fn with_forced_dimension(mut self, dimension: usize) -> Self {
        self.forced_dimension = Some(dimension);
        self
    }

    /// Get the number of embedding requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().map(|log| log.len()).unwrap_or(0)
    }

    /// Get the content of every embedding request made.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.request_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Deterministic unit-range vector for `content`.
    pub fn vector_for(content: &[u8], dimension: usize) -> Vec<f32> {
        let mut vector = Vec::with_capacity(dimension);
        let mut block = 0u32;
        while vector.len() < dimension {
            let mut hasher = Sha256::new();
            hasher.update(content);
            hasher.update(block.to_le_bytes());
            for byte in hasher.finalize() {
                if vector.len() == dimension {
                    break;
                }
                vector.push(f32::from(byte) / 127.5 - 1.0);
            }
            block += 1;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbedder {
    async fn generate_embedding(&self, content: &[u8], dimension: usize) -> Result<Vec<f32>> {
        if let Ok(mut log) = self.request_log.lock() {
            log.push(content.to_vec());
        }

        if let Some(marker) = &self.reject_marker {
            if !marker.is_empty() && content.windows(marker.len()).any(|w| w == marker.as_slice())
            {
                return Err(RagError::ModelRejected(
                    "MockEmbedder: content contains rejected marker".to_string(),
                ));
            }
        }

        let vector = Self::vector_for(content, self.forced_dimension.unwrap_or(dimension));
        check_dimension(&vector, dimension)?;
        Ok(vector)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
