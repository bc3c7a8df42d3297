//! Configuration file support for Hobbit.
//!
//! All hobbit data is stored in a `.hobbit/` directory:
//! - `.hobbit/config.toml` - Configuration file
//! - `.hobbit/logs/` - Daily-rotated index logs
//!
//! Config discovery searches for `.hobbit/config.toml` starting from the current
//! directory and walking up to parent directories. Environment variables
//! override file values (see [`Config::apply_overrides`]).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use hobbit_rag::{
    FailurePolicy, InMemoryVectorStore, MockEmbedder, OpenAiConfig, OpenAiEmbedder,
    PipelineConfig, QdrantConfig, QdrantStore, ScannerConfig, SharedEmbedder, SharedVectorStore,
};

/// The hobbit data directory name.
pub const HOBBIT_DIR: &str = ".hobbit";
/// The config file name within the hobbit directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "golden_patterns";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Project settings.
    pub project: ProjectConfig,
    /// Indexing settings.
    pub index: IndexConfig,
    /// Embedding provider settings.
    pub embedding: EmbeddingConfig,
    /// Vector store settings.
    pub store: StoreConfig,
}

/// Project configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Root of the golden repository, relative to `.hobbit/` unless absolute.
    /// Defaults to the directory that contains `.hobbit/`.
    pub root: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".."),
        }
    }
}

/// Indexing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Destination collection.
    pub collection: String,
    /// File extensions to index.
    pub extensions: Vec<String>,
    /// Files per upsert.
    pub batch_size: usize,
    /// Batches processed concurrently.
    pub max_concurrent_batches: usize,
    /// Files embedded concurrently within a batch.
    pub max_concurrent_files: usize,
    /// Abort on the first file that fails to index.
    pub fail_fast: bool,
    /// Include dot-files and dot-directories.
    pub include_hidden: bool,
    /// Honor `.gitignore` files.
    pub respect_gitignore: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            extensions: vec!["cs".to_string(), "md".to_string()],
            batch_size: hobbit_rag::DEFAULT_BATCH_SIZE,
            max_concurrent_batches: 1,
            max_concurrent_files: 4,
            fail_fast: false,
            include_hidden: true,
            respect_gitignore: false,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider: "openai" or "mock".
    pub provider: String,
    /// API base URL override.
    pub base_url: Option<String>,
    /// Embedding model identifier.
    pub model: String,
    /// Vector dimension; must match the collection.
    pub dimension: usize,
    /// API key (or use OPENAI_API_KEY env var).
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for transient failures.
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: None,
            model: hobbit_rag::openai::DEFAULT_MODEL.to_string(),
            dimension: hobbit_rag::openai::DEFAULT_DIMENSION,
            api_key: None,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

/// Vector store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Provider: "qdrant" or "memory".
    pub provider: String,
    /// Qdrant REST endpoint.
    pub url: String,
    /// Qdrant API key (or use QDRANT_API_KEY env var).
    pub api_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: "qdrant".to_string(),
            url: hobbit_rag::qdrant::DEFAULT_URL.to_string(),
            api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Returns the config and the `.hobbit` directory it was found in.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let hobbit_dir = dir.join(HOBBIT_DIR);
            let config_path = hobbit_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, hobbit_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, ignoring blank values.
    ///
    /// Recognized keys: `OPENAI_API_KEY`, `OPENAI_EMBED_MODEL`,
    /// `QDRANT_ENDPOINT`, `QDRANT_API_KEY`, `RAG_REPO_PATH`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_EMBED_MODEL") {
            self.embedding.model = model;
        }
        if let Some(url) = get("QDRANT_ENDPOINT") {
            self.store.url = url;
        }
        if let Some(key) = get("QDRANT_API_KEY") {
            self.store.api_key = Some(key);
        }
        if let Some(root) = get("RAG_REPO_PATH") {
            self.project.root = PathBuf::from(root);
        }
    }

    /// Resolve the project root relative to the .hobbit directory.
    pub fn resolve_root(&self, hobbit_dir: Option<&Path>) -> PathBuf {
        if self.project.root.is_absolute() {
            self.project.root.clone()
        } else if let Some(dir) = hobbit_dir {
            dir.join(&self.project.root)
        } else {
            self.project.root.clone()
        }
    }

    /// Pipeline tuning derived from the `[index]` and `[embedding]` sections.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let policy = if self.index.fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::SkipAndContinue
        };
        PipelineConfig::new(self.embedding.dimension)
            .with_batch_size(self.index.batch_size)
            .with_concurrency(
                self.index.max_concurrent_batches,
                self.index.max_concurrent_files,
            )
            .with_failure_policy(policy)
            .with_scanner(ScannerConfig {
                include_hidden: self.index.include_hidden,
                respect_gitignore: self.index.respect_gitignore,
                follow_links: false,
            })
    }

    /// Build the configured embedding client.
    pub fn embedder(&self) -> Result<SharedEmbedder> {
        match self.embedding.provider.as_str() {
            "openai" => {
                let key = self.embedding.api_key.clone().unwrap_or_default();
                let mut openai = OpenAiConfig::new(key)
                    .with_model(&self.embedding.model)
                    .with_timeout(Duration::from_secs(self.embedding.timeout_secs))
                    .with_max_retries(self.embedding.max_retries);
                if let Some(url) = &self.embedding.base_url {
                    openai = openai.with_base_url(url);
                }
                Ok(Arc::new(OpenAiEmbedder::new(openai)?))
            }
            "mock" => Ok(MockEmbedder::shared()),
            other => anyhow::bail!("Unknown embedding provider: {}", other),
        }
    }

    /// Build the configured vector store.
    pub fn vector_store(&self) -> Result<SharedVectorStore> {
        match self.store.provider.as_str() {
            "qdrant" => {
                let mut qdrant = QdrantConfig::new(&self.store.url);
                if let Some(key) = &self.store.api_key {
                    qdrant = qdrant.with_api_key(key);
                }
                Ok(Arc::new(QdrantStore::new(qdrant)?))
            }
            "memory" => Ok(InMemoryVectorStore::shared()),
            other => anyhow::bail!("Unknown store provider: {}", other),
        }
    }
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found. Call after
    /// [`apply_env`](Self::apply_env) so env-supplied keys count.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ConfigValidationError {
                field: field.to_string(),
                message,
            })
        };

        if self.index.collection.trim().is_empty() {
            push("index.collection", "Collection name cannot be empty.".into());
        }
        if self.index.extensions.iter().all(|e| e.trim().is_empty()) {
            push(
                "index.extensions",
                "At least one file extension is required.".into(),
            );
        }
        if self.index.batch_size == 0 {
            push("index.batch_size", "Batch size must be at least 1.".into());
        }
        if self.index.max_concurrent_batches == 0 || self.index.max_concurrent_files == 0 {
            push(
                "index.max_concurrent_batches",
                "Concurrency limits must be at least 1.".into(),
            );
        }

        if self.embedding.dimension == 0 {
            push(
                "embedding.dimension",
                "Embedding dimension must be at least 1.".into(),
            );
        }
        match self.embedding.provider.as_str() {
            "openai" => {
                if self
                    .embedding
                    .api_key
                    .as_deref()
                    .is_none_or(|k| k.trim().is_empty())
                {
                    push(
                        "embedding.api_key",
                        "OpenAI API key required. Set [embedding] api_key or OPENAI_API_KEY env var."
                            .into(),
                    );
                }
                if self.embedding.model.trim().is_empty() {
                    push("embedding.model", "Embedding model cannot be empty.".into());
                }
            }
            "mock" => {}
            other => push(
                "embedding.provider",
                format!("Invalid provider '{}'. Expected 'openai' or 'mock'.", other),
            ),
        }

        match self.store.provider.as_str() {
            "qdrant" => {
                if !(self.store.url.starts_with("http://") || self.store.url.starts_with("https://"))
                {
                    push(
                        "store.url",
                        format!("Qdrant endpoint must be an http(s) URL, got '{}'.", self.store.url),
                    );
                }
            }
            "memory" => {}
            other => push(
                "store.provider",
                format!("Invalid provider '{}'. Expected 'qdrant' or 'memory'.", other),
            ),
        }

        errors
    }
}

/// Contents written by `hobbit init`.
pub const DEFAULT_CONFIG: &str = r#"# Hobbit configuration
# All paths are relative to this .hobbit/ directory unless absolute

[project]
root = ".."  # Golden repository root (or set RAG_REPO_PATH)

[index]
collection = "golden_patterns"
extensions = ["cs", "md"]
batch_size = 50
max_concurrent_batches = 1
max_concurrent_files = 4
fail_fast = false  # true aborts on the first file that cannot be embedded

[embedding]
provider = "openai"  # Options: "openai", "mock"
model = "text-embedding-3-small"  # Or use OPENAI_EMBED_MODEL env var
dimension = 1536
timeout_secs = 60
max_retries = 3
# base_url = "https://api.openai.com/v1"
# api_key = "sk-..."  # Or use OPENAI_API_KEY env var

[store]
provider = "qdrant"  # Options: "qdrant", "memory"
url = "http://localhost:6333"  # Or use QDRANT_ENDPOINT env var
# api_key = "..."  # Or use QDRANT_API_KEY env var
"#;
