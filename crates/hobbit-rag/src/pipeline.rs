//! Indexing pipeline.
//!
//! Scans a corpus, embeds each eligible file, and upserts the resulting
//! documents into the vector store one batch at a time.

use std::path::PathBuf;
use std::time::Instant;

use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::embedding::SharedEmbedder;
use crate::error::{RagError, Result};
use crate::scanner::{CorpusScanner, ExtensionSet, ScannedFile, ScannerConfig};
use crate::store::SharedVectorStore;
use crate::types::Document;

/// Default number of files per upsert.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// What to do when a single file cannot be read or embedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure, record it in the summary, keep going.
    #[default]
    SkipAndContinue,
    /// Abort the run on the first failed file.
    FailFast,
}

/// Tuning for an [`IndexingPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Embedding dimension; every stored vector has exactly this length.
    pub dimension: usize,
    /// Files per batch, and therefore per upsert call.
    pub batch_size: usize,
    /// Batches in flight at once.
    pub max_concurrent_batches: usize,
    /// Files read and embedded concurrently within a batch.
    pub max_concurrent_files: usize,
    pub failure_policy: FailurePolicy,
    pub scanner: ScannerConfig,
}

impl PipelineConfig {
    /// Defaults for the given embedding dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: 1,
            max_concurrent_files: 4,
            failure_policy: FailurePolicy::default(),
            scanner: ScannerConfig::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, batches: usize, files: usize) -> Self {
        self.max_concurrent_batches = batches;
        self.max_concurrent_files = files;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_scanner(mut self, scanner: ScannerConfig) -> Self {
        self.scanner = scanner;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RagError::Config("embedding dimension must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(RagError::Config("batch size must be > 0".into()));
        }
        if self.max_concurrent_batches == 0 || self.max_concurrent_files == 0 {
            return Err(RagError::Config("concurrency limits must be > 0".into()));
        }
        Ok(())
    }
}

/// One indexing run.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    /// Directory to traverse.
    pub root: PathBuf,
    /// Allowed file extensions.
    pub extensions: ExtensionSet,
    /// Destination collection.
    pub collection: String,
}

impl IndexRequest {
    pub fn new(
        root: impl Into<PathBuf>,
        extensions: ExtensionSet,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            extensions,
            collection: collection.into(),
        }
    }
}

/// A file that could not be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub batch: usize,
    pub error: String,
}

/// Statistics from an indexing run.
#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    /// Files matched by the scanner.
    pub files_scanned: usize,
    /// Files embedded and committed.
    pub files_indexed: usize,
    /// Zero-length files, never embedded.
    pub files_skipped: usize,
    /// Files that failed to read or embed.
    pub files_failed: usize,
    /// Upsert calls that succeeded.
    pub batches_committed: usize,
    pub failures: Vec<FileFailure>,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
}

impl IndexSummary {
    /// Merge another summary into this one.
    pub fn merge(&mut self, other: IndexSummary) {
        self.files_scanned += other.files_scanned;
        self.files_indexed += other.files_indexed;
        self.files_skipped += other.files_skipped;
        self.files_failed += other.files_failed;
        self.batches_committed += other.batches_committed;
        self.failures.extend(other.failures);
        self.elapsed_ms += other.elapsed_ms;
    }
}

/// Drives scanning, embedding and storage.
///
/// Collaborators are injected so the same pipeline runs against OpenAI and
/// Qdrant in production and against in-process fakes in tests.
pub struct IndexingPipeline {
    embedder: SharedEmbedder,
    store: SharedVectorStore,
    config: PipelineConfig,
}

impl IndexingPipeline {
    pub fn new(embedder: SharedEmbedder, store: SharedVectorStore, config: PipelineConfig) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Index every eligible file under `request.root`.
    ///
    /// Batches already upserted stay committed if a later batch fails or the
    /// run is cancelled; there is no rollback.
    pub async fn index(
        &self,
        request: &IndexRequest,
        cancel: &CancellationToken,
    ) -> Result<IndexSummary> {
        let start = Instant::now();
        self.config.validate()?;
        if request.collection.trim().is_empty() {
            return Err(RagError::Config("collection name must not be empty".into()));
        }
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled {
                committed_batches: 0,
            });
        }

        self.store
            .ensure_collection(&request.collection, self.config.dimension)
            .await?;

        let scanner = CorpusScanner::new(self.config.scanner.clone());
        let root = request.root.clone();
        let extensions = request.extensions.clone();
        let files = tokio::task::spawn_blocking(move || scanner.scan(&root, &extensions))
            .await
            .map_err(|e| RagError::Provider(format!("corpus scan task failed: {}", e)))??;

        let batch_count = files.len().div_ceil(self.config.batch_size);
        tracing::info!(
            root = %request.root.display(),
            collection = %request.collection,
            files = files.len(),
            batches = batch_count,
            embedder = self.embedder.name(),
            store = self.store.name(),
            "Starting indexing run"
        );

        let mut summary = IndexSummary {
            files_scanned: files.len(),
            ..Default::default()
        };

        // Internal abort signal; fires on user cancellation or a fatal error.
        let run = cancel.child_token();
        let mut abort: Option<RagError> = None;

        let mut batches = stream::iter(files.chunks(self.config.batch_size).enumerate())
            .map(|(index, chunk)| {
                let offset = index * self.config.batch_size;
                self.process_batch(&request.collection, index, offset, chunk, &run)
            })
            .buffer_unordered(self.config.max_concurrent_batches);

        while let Some(outcome) = batches.next().await {
            match outcome {
                Ok(batch) => summary.merge(batch),
                Err(RagError::Cancelled { .. }) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Indexing run aborted");
                    run.cancel();
                    abort.get_or_insert(e);
                }
            }
        }
        drop(batches);

        summary.elapsed_ms = start.elapsed().as_millis() as u64;

        if let Some(e) = abort {
            return Err(e);
        }
        if cancel.is_cancelled() {
            tracing::warn!(
                committed_batches = summary.batches_committed,
                "Indexing run cancelled"
            );
            return Err(RagError::Cancelled {
                committed_batches: summary.batches_committed,
            });
        }

        tracing::info!(
            indexed = summary.files_indexed,
            skipped = summary.files_skipped,
            failed = summary.files_failed,
            batches = summary.batches_committed,
            elapsed_ms = summary.elapsed_ms,
            "Indexing run complete"
        );
        Ok(summary)
    }

    /// Assemble and commit one batch.
    async fn process_batch(
        &self,
        collection: &str,
        index: usize,
        offset: usize,
        files: &[ScannedFile],
        cancel: &CancellationToken,
    ) -> Result<IndexSummary> {
        let cancelled = || RagError::Cancelled {
            committed_batches: 0,
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let mut outcome = IndexSummary::default();
        let mut documents = Vec::with_capacity(files.len());

        let mut results = stream::iter(files)
            .map(|file| async move { (file, self.process_file(file, cancel).await) })
            .buffered(self.config.max_concurrent_files);

        while let Some((file, result)) = results.next().await {
            match result {
                Ok(Some(document)) => documents.push(document),
                Ok(None) => outcome.files_skipped += 1,
                Err(RagError::Cancelled { .. }) => return Err(cancelled()),
                Err(e) if e.is_fatal() || self.config.failure_policy == FailurePolicy::FailFast => {
                    return Err(e.in_file(&file.relative).in_batch(index, offset));
                }
                Err(e) => {
                    tracing::warn!(
                        path = %file.relative,
                        batch = index,
                        error = %e,
                        "Skipping file"
                    );
                    outcome.files_failed += 1;
                    outcome.failures.push(FileFailure {
                        path: file.relative.clone(),
                        batch: index,
                        error: e.to_string(),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        if !documents.is_empty() {
            let count = documents.len();
            self.store
                .upsert(collection, documents)
                .await
                .map_err(|e| e.in_batch(index, offset))?;
            outcome.files_indexed = count;
            outcome.batches_committed = 1;
            tracing::info!(batch = index, offset, documents = count, "Committed batch");
        } else {
            tracing::debug!(batch = index, offset, "Batch had nothing to commit");
        }

        Ok(outcome)
    }

    /// Read and embed one file. `None` means the file was empty.
    async fn process_file(
        &self,
        file: &ScannedFile,
        cancel: &CancellationToken,
    ) -> Result<Option<Document>> {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled {
                committed_batches: 0,
            });
        }

        let data = tokio::fs::read(&file.absolute)
            .await
            .map_err(|source| RagError::Io {
                path: file.absolute.clone(),
                source,
            })?;
        if data.is_empty() {
            tracing::debug!(path = %file.relative, "Skipping empty file");
            return Ok(None);
        }

        let embedding = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RagError::Cancelled { committed_batches: 0 }),
            result = self.embedder.generate_embedding(&data, self.config.dimension) => result?,
        };

        Document::new(file.relative.clone(), data, embedding, self.config.dimension).map(Some)
    }
}
