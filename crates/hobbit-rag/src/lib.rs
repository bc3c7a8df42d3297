//! hobbit-rag: golden-pattern retrieval store
//!
//! This crate indexes a corpus of reference files into vector embeddings and
//! serves similarity search over them:
//! - Corpus scanning with an extension allow-list
//! - Batched, cancellable indexing with path-derived document identity
//! - kNN search returning a lazy stream of ranked matches
//! - Embedding client abstraction (OpenAI-compatible, deterministic mock)
//! - Vector store abstraction (Qdrant REST, in-memory)

pub mod embedding;
pub mod error;
pub mod openai;
pub mod pipeline;
pub mod qdrant;
pub mod scanner;
pub mod search;
pub mod store;
pub mod types;

// Testing utilities - available in test builds and with the `testing` feature
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use embedding::{EmbeddingClient, MockEmbedder, SharedEmbedder, check_dimension, with_retry};
pub use error::{RagError, Result};
pub use openai::{OpenAiConfig, OpenAiEmbedder};
pub use pipeline::{
    DEFAULT_BATCH_SIZE, FailurePolicy, FileFailure, IndexRequest, IndexSummary, IndexingPipeline,
    PipelineConfig,
};
pub use qdrant::{QdrantConfig, QdrantStore};
pub use scanner::{CorpusScanner, ExtensionSet, ScannedFile, ScannerConfig};
pub use search::{MatchStream, SearchService};
pub use store::{InMemoryVectorStore, SharedVectorStore, VectorStore};
pub use types::{Document, Match, ScoredDocument, document_id, relative_path};

/// Re-exported so callers can cancel runs without depending on tokio-util.
pub use tokio_util::sync::CancellationToken;
