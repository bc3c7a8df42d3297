//! Testing utilities for hobbit-rag.
//!
//! HTTP mock servers that mimic the OpenAI embeddings API and the Qdrant
//! REST API, so the HTTP collaborators can be exercised end to end without
//! real services.

pub mod mock_server;

pub use mock_server::{MockEmbeddingServer, MockQdrantServer};
