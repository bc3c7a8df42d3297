//! Document and match records.

use std::borrow::Cow;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

/// A stored, embedded unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Key derived from `path`; stable across indexing runs.
    pub id: String,
    /// Path relative to the indexed root, forward-slash separated.
    pub path: String,
    /// Raw content bytes as read from source.
    pub data: Vec<u8>,
    /// Embedding vector of the configured dimension.
    pub embedding: Vec<f32>,
}

impl Document {
    /// Build a document, checking the record invariants.
    ///
    /// The id is derived from `path`, so re-indexing the same file
    /// overwrites the previous record instead of adding a new one.
    pub fn new(
        path: impl Into<String>,
        data: Vec<u8>,
        embedding: Vec<f32>,
        dimension: usize,
    ) -> Result<Self> {
        let path = path.into();
        if path.is_empty() || path.starts_with('/') || path.contains('\\') {
            return Err(RagError::InvalidRequest(format!(
                "document path must be relative and forward-slash normalized: {path:?}"
            )));
        }
        if data.is_empty() {
            return Err(RagError::InvalidRequest(format!(
                "document {path} has no content"
            )));
        }
        if embedding.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: embedding.len(),
            });
        }

        Ok(Self {
            id: document_id(&path),
            path,
            data,
            embedding,
        })
    }
}

/// Derive the storage key for a normalized relative path.
///
/// SHA-256 of the path, truncated to 16 bytes and rendered as a UUID so
/// stores with UUID-only point ids accept it.
pub fn document_id(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}

/// Express `path` relative to `root` using `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        RagError::InvalidRequest(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            other => {
                return Err(RagError::InvalidRequest(format!(
                    "unexpected path component {other:?} in {}",
                    path.display()
                )));
            }
        }
    }

    if parts.is_empty() {
        return Err(RagError::InvalidRequest(format!(
            "{} resolves to the root itself",
            path.display()
        )));
    }

    // Backslashes inside a component only appear on Windows-style names.
    Ok(parts.join("/").replace('\\', "/"))
}

/// A raw `(document, score)` pair as ranked by a vector store.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f64,
}

/// A per-query search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    /// Relative path of the matched document.
    pub path: String,
    /// Store-defined similarity; higher is more relevant.
    pub score: f64,
    /// Content returned by the store.
    pub data: Vec<u8>,
}

impl Match {
    /// Content as text, replacing invalid UTF-8 sequences.
    pub fn snippet(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

impl From<ScoredDocument> for Match {
    fn from(scored: ScoredDocument) -> Self {
        Self {
            path: scored.document.path,
            score: scored.score,
            data: scored.document.data,
        }
    }
}
