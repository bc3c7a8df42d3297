//! OpenAI embeddings client.
//!
//! Talks to any OpenAI-compatible `/embeddings` endpoint (OpenAI, Azure
//! proxies, Ollama, LiteLLM).

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use std::time::Duration;

use crate::embedding::{EmbeddingClient, check_dimension, with_retry};
use crate::error::{RagError, Result};

/// Default OpenAI API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default embedding model.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Native dimension of the default model.
pub const DEFAULT_DIMENSION: usize = 1536;

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration for the OpenAI embedder.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key sent as a bearer token.
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Embedding model identifier.
    pub model: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,
}

impl OpenAiConfig {
    /// Create a new config with the given API key and defaults.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
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

/// OpenAI embeddings backend.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiEmbedder {
    /// Create a new embedder with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RagError::Config("missing OpenAI API key".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(RagError::Config("missing embedding model name".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Build the embeddings endpoint URL.
    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim_end_matches('/'))
    }

    /// Make a single embeddings request.
    async fn send_request(&self, input: &str, dimension: usize) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input,
            dimensions: dimension,
        };

        tracing::debug!(
            model = %self.config.model,
            dimension = dimension,
            bytes = input.len(),
            "OpenAI embedding request"
        );

        let response = self
            .client
            .post(self.embeddings_url())
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(self.config.api_key.trim())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::Serialization(format!("Failed to parse response: {}", e)))?;

        let data = parsed.data.pop().ok_or_else(|| {
            RagError::Provider("OpenAI response contained no embeddings".to_string())
        })?;

        check_dimension(&data.embedding, dimension)?;
        Ok(data.embedding)
    }
}

/// Map a non-success status to the error taxonomy.
fn classify_status(status: StatusCode, body: String) -> RagError {
    let message = format!("OpenAI API error ({}): {}", status.as_u16(), body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RagError::Auth(message),
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => RagError::ModelRejected(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => RagError::Network(message),
        s if s.is_server_error() => RagError::Network(message),
        _ => RagError::Provider(message),
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedder {
    async fn generate_embedding(&self, content: &[u8], dimension: usize) -> Result<Vec<f32>> {
        let text = std::str::from_utf8(content).map_err(|e| {
            RagError::ModelRejected(format!("text embedding model requires UTF-8 input: {}", e))
        })?;

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "openai",
            || self.send_request(text, dimension),
        )
        .await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
