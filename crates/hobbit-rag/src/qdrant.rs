//! Qdrant vector store over the REST API.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

use crate::embedding::with_retry;
use crate::error::{RagError, Result};
use crate::store::VectorStore;
use crate::types::{Document, ScoredDocument};

/// Default Qdrant REST endpoint.
pub const DEFAULT_URL: &str = "http://localhost:6333";

/// Configuration for the Qdrant store.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Base URL of the REST API.
    pub url: String,

    /// Value for the `api-key` header, if the cluster requires one.
    pub api_key: Option<String>,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl QdrantConfig {
    /// Create a config pointing at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set max retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the initial retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Qdrant-backed [`VectorStore`].
pub struct QdrantStore {
    client: Client,
    base_url: Url,
    config: QdrantConfig,
}

impl QdrantStore {
    /// Create a new store client.
    pub fn new(config: QdrantConfig) -> Result<Self> {
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(RagError::Config(format!(
                "Qdrant endpoint must be an http(s) URL, got {:?}",
                config.url
            )));
        }

        let base_url = Url::parse(&config.url)
            .map_err(|e| RagError::Config(format!("Invalid Qdrant endpoint {:?}: {}", config.url, e)))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// `{base}/collections/{collection}/{tail...}` with every segment
    /// percent-encoded.
    fn collection_url(&self, collection: &str, tail: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RagError::Config(format!("Qdrant endpoint cannot be a base URL: {}", self.config.url))
            })?
            .pop_if_empty()
            .push("collections")
            .push(collection)
            .extend(tail);
        Ok(url)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header("api-key", key.trim()),
            None => builder,
        }
    }

    /// Run a request with retry, mapping error statuses.
    ///
    /// Returns `None` on 404 so callers can treat a missing collection as
    /// empty.
    async fn send<T, F>(&self, operation: &str, build: F) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "qdrant",
            || {
                let request = self.with_auth(build());
                async move {
                    let response = request.send().await?;
                    parse_response(operation, response).await
                }
            },
        )
        .await
    }
}

async fn parse_response<T: DeserializeOwned>(
    operation: &str,
    response: Response,
) -> Result<Option<T>> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = format!("Qdrant {} failed ({}): {}", operation, status.as_u16(), body);
        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RagError::Auth(message),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                RagError::Network(message)
            }
            s if s.is_server_error() => RagError::Network(message),
            _ => RagError::Provider(message),
        });
    }

    let parsed: QdrantResponse<T> = response.json().await.map_err(|e| {
        RagError::Serialization(format!("Failed to parse Qdrant {} response: {}", operation, e))
    })?;
    Ok(Some(parsed.result))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        if let Some(existing) = self.collection_dimension(collection).await? {
            if existing != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                });
            }
            return Ok(());
        }

        tracing::info!(collection, dimension, "Creating Qdrant collection");
        let body = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine".to_string(),
            },
        };
        let url = self.collection_url(collection, &[])?;
        let created: Option<serde_json::Value> = self
            .send("create collection", || self.client.put(url.clone()).json(&body))
            .await?;
        if created.is_none() {
            return Err(RagError::Provider(format!(
                "Qdrant refused to create collection {collection}"
            )));
        }
        Ok(())
    }

    async fn collection_dimension(&self, collection: &str) -> Result<Option<usize>> {
        let url = self.collection_url(collection, &[])?;
        let info: Option<CollectionInfo> = self
            .send("get collection", || self.client.get(url.clone()))
            .await?;

        match info {
            None => Ok(None),
            Some(info) => match info.config.params.vectors {
                VectorsConfig::Single(params) => Ok(Some(params.size)),
                VectorsConfig::Named(names) => Err(RagError::Config(format!(
                    "collection {collection} uses {} named vectors; only a single unnamed vector is supported",
                    names.len()
                ))),
            },
        }
    }

    async fn upsert(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let points: Vec<Point> = documents
            .into_iter()
            .map(|d| Point {
                id: d.id,
                vector: d.embedding,
                payload: Payload {
                    path: d.path,
                    data: BASE64.encode(&d.data),
                },
            })
            .collect();
        let body = UpsertPoints { points };
        let mut url = self.collection_url(collection, &["points"])?;
        url.query_pairs_mut().append_pair("wait", "true");

        let result: Option<serde_json::Value> = self
            .send("upsert", || self.client.put(url.clone()).json(&body))
            .await?;
        if result.is_none() {
            return Err(RagError::Provider(format!(
                "collection {collection} does not exist"
            )));
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let body = SearchPoints {
            vector,
            limit: top_k,
            with_payload: true,
            with_vector: false,
        };
        let url = self.collection_url(collection, &["points", "search"])?;

        let hits: Option<Vec<ScoredPoint>> = self
            .send("search", || self.client.post(url.clone()).json(&body))
            .await?;

        hits.unwrap_or_default()
            .into_iter()
            .map(|hit| {
                let data = BASE64.decode(hit.payload.data.as_bytes()).map_err(|e| {
                    RagError::Serialization(format!(
                        "point {} has invalid data payload: {}",
                        hit.payload.path, e
                    ))
                })?;
                let id = match hit.id {
                    serde_json::Value::String(id) => id,
                    other => other.to_string(),
                };
                Ok(ScoredDocument {
                    document: Document {
                        id,
                        path: hit.payload.path,
                        data,
                        embedding: hit.vector.unwrap_or_default(),
                    },
                    score: hit.score,
                })
            })
            .collect()
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let body = serde_json::json!({ "exact": true });
        let url = self.collection_url(collection, &["points", "count"])?;

        let result: Option<CountResult> = self
            .send("count", || self.client.post(url.clone()).json(&body))
            .await?;
        Ok(result.map(|r| r.count).unwrap_or(0))
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Qdrant API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Debug, Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VectorsConfig {
    Single(VectorParams),
    Named(serde_json::Map<String, serde_json::Value>),
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    path: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: Payload,
}

#[derive(Debug, Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Debug, Serialize)]
struct SearchPoints<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f64,
    payload: Payload,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockQdrantServer;

    fn store_for(server: &MockQdrantServer) -> QdrantStore {
        QdrantStore::new(
            QdrantConfig::new(server.url()).with_retry_backoff(Duration::from_millis(1)),
        )
        .unwrap()
    }

    fn doc(path: &str, data: &[u8], embedding: Vec<f32>) -> Document {
        let dimension = embedding.len();
        Document::new(path, data.to_vec(), embedding, dimension).unwrap()
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(
            QdrantStore::new(QdrantConfig::new("localhost:6333")),
            Err(RagError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_collection_creates_once() {
        let server = MockQdrantServer::start().await;
        let store = store_for(&server);

        assert_eq!(store.collection_dimension("golden").await.unwrap(), None);
        store.ensure_collection("golden", 3).await.unwrap();
        store.ensure_collection("golden", 3).await.unwrap();
        assert_eq!(store.collection_dimension("golden").await.unwrap(), Some(3));

        let err = store.ensure_collection("golden", 4).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_upsert_search_and_count() {
        let server = MockQdrantServer::start().await;
        let store = store_for(&server);
        store.ensure_collection("golden", 2).await.unwrap();

        store
            .upsert(
                "golden",
                vec![
                    doc("a.md", b"alpha", vec![1.0, 0.0]),
                    doc("b.bin", &[0, 159, 146, 150], vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        // Same path again replaces, not duplicates
        store
            .upsert("golden", vec![doc("a.md", b"alpha v2", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(store.count("golden").await.unwrap(), 2);

        let hits = store.search("golden", &[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.path, "b.bin");
        assert_eq!(hits[0].document.data, vec![0, 159, 146, 150]);
        server.shutdown().await;
    }

    #[test]
    fn test_collection_url_encodes_name() {
        let store = QdrantStore::new(QdrantConfig::new("http://qdrant:6333/")).unwrap();
        let url = store
            .collection_url("team a/patterns?v=2", &["points", "search"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://qdrant:6333/collections/team%20a%2Fpatterns%3Fv=2/points/search"
        );
    }

    #[tokio::test]
    async fn test_collection_name_with_reserved_characters() {
        let server = MockQdrantServer::start().await;
        let store = store_for(&server);
        let name = "team a/patterns";

        store.ensure_collection(name, 2).await.unwrap();
        store
            .upsert(name, vec![doc("a.md", b"alpha", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(server.point_count(name), 1);
        assert_eq!(store.count(name).await.unwrap(), 1);
        assert_eq!(store.count("team a").await.unwrap(), 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_search_does_not_fetch_vectors() {
        let server = MockQdrantServer::start().await;
        let store = store_for(&server);
        store.ensure_collection("golden", 2).await.unwrap();
        store
            .upsert("golden", vec![doc("a.md", b"alpha", vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = store.search("golden", &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.data, b"alpha");
        assert!(hits[0].document.embedding.is_empty());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_collection_search_is_empty() {
        let server = MockQdrantServer::start().await;
        let store = store_for(&server);

        assert!(store.search("nope", &[1.0], 3).await.unwrap().is_empty());
        assert_eq!(store.count("nope").await.unwrap(), 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let server = MockQdrantServer::start().await;
        server.fail_next(2, 502);
        let store = store_for(&server);

        store.ensure_collection("golden", 2).await.unwrap();
        assert_eq!(store.collection_dimension("golden").await.unwrap(), Some(2));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces() {
        let server = MockQdrantServer::start().await;
        server.fail_next(1, 403);
        let store = store_for(&server);

        let err = store.count("golden").await.unwrap_err();
        assert!(matches!(err, RagError::Auth(_)));
        server.shutdown().await;
    }
}
