//! Vector store abstraction.
//!
//! The pipeline and search service only ever talk to a [`VectorStore`];
//! nearest-neighbor indexing, distance computation, and persistence belong
//! to the implementation behind it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{RagError, Result};
use crate::types::{Document, ScoredDocument};

// ============================================================================
// Vector Store Abstraction
// ============================================================================

/// Trait for vector storage backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist.
    ///
    /// Fails with [`RagError::DimensionMismatch`] if it exists with a
    /// different vector size.
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()>;

    /// Vector size of an existing collection, or `None` if it is absent.
    async fn collection_dimension(&self, collection: &str) -> Result<Option<usize>>;

    /// Insert or replace documents by id, as a single store call.
    async fn upsert(&self, collection: &str, documents: Vec<Document>) -> Result<()>;

    /// The `top_k` documents nearest to `vector`, most relevant first.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>>;

    /// Number of documents in the collection (0 if absent).
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Get the name of this store.
    fn name(&self) -> &str;
}

/// Thread-safe handle to a vector store.
pub type SharedVectorStore = Arc<dyn VectorStore>;

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

#[derive(Debug, Default)]
struct Collection {
    dimension: usize,
    documents: HashMap<String, Document>,
}

/// In-process vector store with brute-force cosine similarity.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Create a shared instance.
    pub fn shared() -> SharedVectorStore {
        Arc::new(Self::new())
    }

    /// All documents in a collection, sorted by path.
    pub fn documents(&self, collection: &str) -> Result<Vec<Document>> {
        let collections = self.collections.read().map_err(lock_error)?;
        let mut documents: Vec<_> = collections
            .get(collection)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default();
        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> RagError {
    RagError::Provider(format!("Failed to acquire store lock: {}", e))
}

/// Cosine similarity in `[-1, 1]`; zero vectors score 0.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().map_err(lock_error)?;
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dimension,
                documents: HashMap::new(),
            });
        if entry.dimension != dimension {
            return Err(RagError::DimensionMismatch {
                expected: entry.dimension,
                actual: dimension,
            });
        }
        Ok(())
    }

    async fn collection_dimension(&self, collection: &str) -> Result<Option<usize>> {
        let collections = self.collections.read().map_err(lock_error)?;
        Ok(collections.get(collection).map(|c| c.dimension))
    }

    async fn upsert(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let mut collections = self.collections.write().map_err(lock_error)?;
        let target = collections.get_mut(collection).ok_or_else(|| {
            RagError::Provider(format!("collection {collection} does not exist"))
        })?;

        // Validate the whole batch before applying any of it.
        if let Some(bad) = documents
            .iter()
            .find(|d| d.embedding.len() != target.dimension)
        {
            return Err(RagError::DimensionMismatch {
                expected: target.dimension,
                actual: bad.embedding.len(),
            });
        }

        for document in documents {
            target.documents.insert(document.id.clone(), document);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let collections = self.collections.read().map_err(lock_error)?;
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        if vector.len() != target.dimension {
            return Err(RagError::DimensionMismatch {
                expected: target.dimension,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<_> = target
            .documents
            .values()
            .map(|d| ScoredDocument {
                score: cosine_similarity(vector, &d.embedding),
                document: d.clone(),
            })
            .collect();

        // Sort by score descending, ties broken by path for stable output
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.path.cmp(&b.document.path))
        });

        scored.truncate(top_k);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().map_err(lock_error)?;
        Ok(collections
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
