//! Cross-crate integration and E2E tests
//!
//! These tests drive the indexing pipeline and the search service together
//! against real files on disk, checking what ends up in the store and what
//! comes back out of a query.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use hobbit_rag::testing::{MockEmbeddingServer, MockQdrantServer};
use hobbit_rag::{
    CancellationToken, Document, ExtensionSet, InMemoryVectorStore, IndexRequest,
    IndexingPipeline, MockEmbedder, OpenAiConfig, OpenAiEmbedder, PipelineConfig, QdrantConfig,
    QdrantStore, RagError, ScoredDocument, SearchService, VectorStore,
};
use tempfile::TempDir;

const DIM: usize = 32;
const COLLECTION: &str = "golden_patterns";

fn write(dir: &Path, relative: &str, content: &[u8]) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn request(dir: &TempDir) -> IndexRequest {
    IndexRequest::new(dir.path(), ExtensionSet::new([".md", ".cs"]), COLLECTION)
}

fn pipeline(store: Arc<dyn VectorStore>, batch_size: usize) -> IndexingPipeline {
    IndexingPipeline::new(
        MockEmbedder::shared(),
        store,
        PipelineConfig::new(DIM).with_batch_size(batch_size),
    )
}

/// Store wrapper that fires a cancellation token after the Nth upsert.
struct CancelAfterUpsert {
    inner: InMemoryVectorStore,
    after: usize,
    seen: std::sync::atomic::AtomicUsize,
    token: CancellationToken,
}

#[async_trait]
impl VectorStore for CancelAfterUpsert {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> hobbit_rag::Result<()> {
        self.inner.ensure_collection(collection, dimension).await
    }

    async fn collection_dimension(&self, collection: &str) -> hobbit_rag::Result<Option<usize>> {
        self.inner.collection_dimension(collection).await
    }

    async fn upsert(&self, collection: &str, documents: Vec<Document>) -> hobbit_rag::Result<()> {
        self.inner.upsert(collection, documents).await?;
        let seen = self
            .seen
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        if seen == self.after {
            self.token.cancel();
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> hobbit_rag::Result<Vec<ScoredDocument>> {
        self.inner.search(collection, vector, top_k).await
    }

    async fn count(&self, collection: &str) -> hobbit_rag::Result<usize> {
        self.inner.count(collection).await
    }

    fn name(&self) -> &str {
        "cancel-after-upsert"
    }
}

/// Every non-empty eligible file is stored with its relative path and exact bytes.
#[tokio::test]
async fn test_index_stores_every_eligible_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "README.md", b"# Golden service");
    write(dir.path(), "src/Features/Orders/CreateOrder.cs", b"public sealed class CreateOrder {}");
    write(dir.path(), "docs/GUIDE.MD", b"upper-case extension");
    write(dir.path(), "src/Binary.cs", &[0x00, 0xff, 0x10, 0x80]);
    write(dir.path(), "src/Empty.cs", b"");
    write(dir.path(), "build.sh", b"#!/bin/sh");

    let store = Arc::new(InMemoryVectorStore::new());
    let summary = pipeline(store.clone(), 2)
        .index(&request(&dir), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.files_scanned, 5);
    assert_eq!(summary.files_indexed, 4);
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.files_failed, 0);

    let docs = store.documents(COLLECTION).unwrap();
    for (path, expected) in [
        ("README.md", b"# Golden service".to_vec()),
        ("docs/GUIDE.MD", b"upper-case extension".to_vec()),
        ("src/Binary.cs", vec![0x00, 0xff, 0x10, 0x80]),
        (
            "src/Features/Orders/CreateOrder.cs",
            b"public sealed class CreateOrder {}".to_vec(),
        ),
    ] {
        let doc = docs
            .iter()
            .find(|d| d.path == path)
            .unwrap_or_else(|| panic!("{path} was not indexed"));
        assert_eq!(doc.data, expected);
        assert_eq!(doc.embedding.len(), DIM);
    }
    assert!(docs.iter().all(|d| d.path != "src/Empty.cs"));
}

/// `a.md` ("hello") and an empty `b.cs` produce exactly one document.
#[tokio::test]
async fn test_empty_file_example() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.md", b"hello");
    write(dir.path(), "b.cs", b"");

    let store = Arc::new(InMemoryVectorStore::new());
    pipeline(store.clone(), 50)
        .index(&request(&dir), &CancellationToken::new())
        .await
        .unwrap();

    let docs = store.documents(COLLECTION).unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].path, "a.md");
    assert_eq!(docs[0].data, b"hello");
}

/// Indexing an unchanged tree twice yields the same document count.
#[tokio::test]
async fn test_reindex_unchanged_tree() {
    let dir = TempDir::new().unwrap();
    for i in 0..12 {
        write(dir.path(), &format!("patterns/p{i}.md"), format!("pattern {i}").as_bytes());
    }

    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(store.clone(), 5);
    pipeline
        .index(&request(&dir), &CancellationToken::new())
        .await
        .unwrap();
    let first = store.count(COLLECTION).await.unwrap();
    pipeline
        .index(&request(&dir), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first, 12);
    assert_eq!(store.count(COLLECTION).await.unwrap(), first);
}

/// Ten documents, top-3 query: exactly three matches in descending score order.
#[tokio::test]
async fn test_search_top_three() {
    let dir = TempDir::new().unwrap();
    for i in 0..10 {
        write(dir.path(), &format!("doc{i}.md"), format!("document number {i}").as_bytes());
    }

    let store = Arc::new(InMemoryVectorStore::new());
    pipeline(store.clone(), 4)
        .index(&request(&dir), &CancellationToken::new())
        .await
        .unwrap();

    let service = SearchService::new(MockEmbedder::shared(), store, DIM);
    let matches = service
        .search_all(COLLECTION, b"foo", 3, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(matches.len(), 3);
    assert!(matches.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(matches.iter().all(|m| m.path.starts_with("doc") && !m.data.is_empty()));
}

/// Searching an absent or empty collection returns an empty stream.
#[tokio::test]
async fn test_search_absent_collection() {
    let store = Arc::new(InMemoryVectorStore::new());
    let service = SearchService::new(MockEmbedder::shared(), store.clone(), DIM);

    let mut stream = service
        .search(COLLECTION, b"anything", 5, &CancellationToken::new())
        .await
        .unwrap();
    assert!(stream.next().await.is_none());

    store.ensure_collection(COLLECTION, DIM).await.unwrap();
    let matches = service
        .search_all(COLLECTION, b"anything", 5, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches.is_empty());
}

/// Cancelling after batch 1 of 3 leaves exactly batch 1's documents.
#[tokio::test]
async fn test_cancel_after_first_of_three_batches() {
    let dir = TempDir::new().unwrap();
    for i in 0..9 {
        write(dir.path(), &format!("f{i}.md"), format!("file {i}").as_bytes());
    }

    let cancel = CancellationToken::new();
    let store = Arc::new(CancelAfterUpsert {
        inner: InMemoryVectorStore::new(),
        after: 1,
        seen: Default::default(),
        token: cancel.clone(),
    });

    let err = pipeline(store.clone(), 3)
        .index(&request(&dir), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RagError::Cancelled {
            committed_batches: 1
        }
    ));
    let paths: Vec<_> = store
        .inner
        .documents(COLLECTION)
        .unwrap()
        .into_iter()
        .map(|d| d.path)
        .collect();
    assert_eq!(paths, vec!["f0.md", "f1.md", "f2.md"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// E2E over HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// E2E Test: index and search through the OpenAI and Qdrant HTTP clients.
#[tokio::test]
async fn test_e2e_http_clients_index_and_search() {
    let embeddings = MockEmbeddingServer::start().await;
    let qdrant = MockQdrantServer::start().await;

    let dir = TempDir::new().unwrap();
    write(dir.path(), "handlers/CreateOrder.cs", b"class CreateOrderHandler {}");
    write(dir.path(), "handlers/DeleteOrder.cs", b"class DeleteOrderHandler {}");
    write(dir.path(), "handlers/Empty.cs", b"");
    write(dir.path(), "README.md", b"Golden service overview");

    let embedder = Arc::new(
        OpenAiEmbedder::new(OpenAiConfig::new("sk-test").with_base_url(embeddings.url())).unwrap(),
    );
    let store = Arc::new(QdrantStore::new(QdrantConfig::new(qdrant.url())).unwrap());

    let summary = IndexingPipeline::new(embedder.clone(), store.clone(), PipelineConfig::new(DIM))
        .index(&request(&dir), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.files_indexed, 3);
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(qdrant.point_count(COLLECTION), 3);
    assert!(
        embeddings
            .captured_inputs()
            .iter()
            .all(|(input, dimensions)| !input.is_empty() && *dimensions == DIM)
    );

    let service = SearchService::new(embedder, store, DIM);
    let matches = service
        .search_all(
            COLLECTION,
            b"class DeleteOrderHandler {}",
            2,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].path, "handlers/DeleteOrder.cs");
    assert_eq!(matches[0].snippet(), "class DeleteOrderHandler {}");
    assert_eq!(embeddings.request_count(), 4);

    embeddings.shutdown().await;
    qdrant.shutdown().await;
}
