//! Query path: embed, kNN search, map to matches.

use std::pin::Pin;

use futures::{Stream, StreamExt, TryStreamExt, future, stream};
use tokio_util::sync::CancellationToken;

use crate::embedding::{SharedEmbedder, check_dimension};
use crate::error::{RagError, Result};
use crate::store::SharedVectorStore;
use crate::types::Match;

/// Ranked search results, most relevant first.
///
/// Finite and single-pass. Ends early once the cancellation token that was
/// passed to [`SearchService::search`] fires.
pub type MatchStream = Pin<Box<dyn Stream<Item = Result<Match>> + Send>>;

/// Similarity search over an indexed collection.
pub struct SearchService {
    embedder: SharedEmbedder,
    store: SharedVectorStore,
    dimension: usize,
}

impl SearchService {
    /// `dimension` must be the one the collection was indexed with.
    pub fn new(embedder: SharedEmbedder, store: SharedVectorStore, dimension: usize) -> Self {
        Self {
            embedder,
            store,
            dimension,
        }
    }

    /// Search `collection` for the documents nearest to `query`.
    ///
    /// An absent or empty collection yields an empty stream without calling
    /// the embedder. Scores and ordering come from the store unchanged.
    pub async fn search(
        &self,
        collection: &str,
        query: &[u8],
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<MatchStream> {
        if max_results == 0 {
            return Err(RagError::InvalidRequest(
                "max_results must be at least 1".into(),
            ));
        }
        if query.is_empty() {
            return Err(RagError::InvalidRequest("query must not be empty".into()));
        }
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled {
                committed_batches: 0,
            });
        }

        match self.store.collection_dimension(collection).await? {
            None => {
                tracing::debug!(collection, "Search against absent collection");
                return Ok(empty());
            }
            Some(indexed) if indexed != self.dimension => {
                return Err(RagError::DimensionMismatch {
                    expected: indexed,
                    actual: self.dimension,
                });
            }
            Some(_) => {}
        }
        if self.store.count(collection).await? == 0 {
            tracing::debug!(collection, "Search against empty collection");
            return Ok(empty());
        }

        let vector = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RagError::Cancelled { committed_batches: 0 }),
            result = self.embedder.generate_embedding(query, self.dimension) => result?,
        };
        check_dimension(&vector, self.dimension)?;

        let hits = self.store.search(collection, &vector, max_results).await?;
        tracing::debug!(
            collection,
            max_results,
            hits = hits.len(),
            "Search complete"
        );

        let token = cancel.clone();
        let matches = stream::iter(
            hits.into_iter()
                .take(max_results)
                .map(|hit| Ok::<_, RagError>(Match::from(hit))),
        )
        .take_while(move |_| future::ready(!token.is_cancelled()));
        Ok(Box::pin(matches))
    }

    /// [`search`](Self::search), collected into a vector.
    pub async fn search_all(
        &self,
        collection: &str,
        query: &[u8],
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Match>> {
        self.search(collection, query, max_results, cancel)
            .await?
            .try_collect()
            .await
    }
}

fn empty() -> MatchStream {
    Box::pin(stream::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClient, MockEmbedder};
    use crate::store::{InMemoryVectorStore, VectorStore};
    use crate::types::Document;
    use std::sync::Arc;

    const DIM: usize = 16;

    async fn seeded_store(count: usize) -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        store.ensure_collection("golden", DIM).await.unwrap();
        let documents = (0..count)
            .map(|i| {
                let data = format!("pattern {i}").into_bytes();
                let embedding = MockEmbedder::vector_for(&data, DIM);
                Document::new(format!("p{i}.md"), data, embedding, DIM).unwrap()
            })
            .collect();
        store.upsert("golden", documents).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_returns_at_most_k_in_descending_order() {
        let store = seeded_store(10).await;
        let service = SearchService::new(MockEmbedder::shared(), store, DIM);

        let matches = service
            .search_all("golden", b"foo", 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(matches.len(), 3);
        assert!(matches.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(matches.iter().all(|m| !m.data.is_empty()));
    }

    #[tokio::test]
    async fn test_exact_content_ranks_first() {
        let store = seeded_store(5).await;
        let service = SearchService::new(MockEmbedder::shared(), store, DIM);

        let matches = service
            .search_all("golden", b"pattern 3", 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(matches[0].path, "p3.md");
        assert_eq!(matches[0].snippet(), "pattern 3");
        assert!((matches[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_absent_and_empty_collections_skip_embedding() {
        let embedder = Arc::new(MockEmbedder::new());
        let store = Arc::new(InMemoryVectorStore::new());
        let service = SearchService::new(embedder.clone(), store.clone(), DIM);

        let absent = service
            .search_all("golden", b"foo", 5, &CancellationToken::new())
            .await
            .unwrap();
        assert!(absent.is_empty());

        store.ensure_collection("golden", DIM).await.unwrap();
        let empty = service
            .search_all("golden", b"foo", 5, &CancellationToken::new())
            .await
            .unwrap();
        assert!(empty.is_empty());
        assert_eq!(embedder.request_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_max_results_is_invalid() {
        let service = SearchService::new(MockEmbedder::shared(), seeded_store(1).await, DIM);
        let err = service
            .search("golden", b"foo", 0, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RagError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_collection_dimension_mismatch() {
        let store = seeded_store(2).await;
        let service = SearchService::new(MockEmbedder::shared(), store, DIM * 2);

        let err = service
            .search("golden", b"foo", 3, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: DIM,
                actual: 32
            }
        ));
    }

    #[tokio::test]
    async fn test_query_vector_dimension_mismatch() {
        let store = seeded_store(2).await;
        let embedder = Arc::new(MockEmbedder::new().with_forced_dimension(DIM / 2));
        let service = SearchService::new(embedder, store, DIM);

        let err = service
            .search("golden", b"foo", 3, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream_early() {
        let store = seeded_store(6).await;
        let service = SearchService::new(MockEmbedder::shared(), store, DIM);
        let cancel = CancellationToken::new();

        let mut stream = service.search("golden", b"foo", 6, &cancel).await.unwrap();
        assert!(stream.next().await.is_some());
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_embedder_is_called_once_per_query() {
        let store = seeded_store(3).await;
        let embedder = Arc::new(MockEmbedder::new());
        let service = SearchService::new(embedder.clone(), store, DIM);

        service
            .search_all("golden", b"needle", 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(embedder.requests(), vec![b"needle".to_vec()]);
        assert_eq!(embedder.name(), "mock");
    }
}
