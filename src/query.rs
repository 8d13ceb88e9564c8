//! Semantic query engine.
//!
//! Embeds the query with the same model the index was built with, retrieves
//! the nearest chunks from the [`IndexStore`], and optionally keeps only the
//! best chunk per file.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_with_retry, EmbedError, EmbeddingClient, RetryPolicy};
use crate::error::{IndexError, Result};
use crate::models::{Metric, SearchFilter, SearchHit, Span};
use crate::store::IndexStore;

/// Structured filters accepted by [`QueryEngine::query`].
pub type QueryFilters = SearchFilter;

/// One ranked result with its source attribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub file_path: String,
    pub chunk_text: String,
    pub score: f64,
    pub span: Span,
    pub seq: usize,
    pub media_type: Option<String>,
}

impl From<SearchHit> for QueryHit {
    fn from(hit: SearchHit) -> Self {
        Self {
            file_path: hit.file_path,
            chunk_text: hit.text,
            score: hit.score,
            span: hit.span,
            seq: hit.seq,
            media_type: hit.media_type,
        }
    }
}

pub struct QueryEngine {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn EmbeddingClient>,
    retry: RetryPolicy,
    metric: Metric,
    dedupe_by_file: bool,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn EmbeddingClient>,
        retrieval: &RetrievalConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            retry,
            metric: retrieval.metric(),
            dedupe_by_file: retrieval.dedupe_by_file,
        }
    }

    /// Override `retrieval.dedupe_by_file` for this engine.
    pub fn dedupe_by_file(mut self, dedupe: bool) -> Self {
        self.dedupe_by_file = dedupe;
        self
    }

    /// The `k` most similar chunks to `text` under `filters`.
    ///
    /// An empty index or a blank query returns no hits. A provider whose
    /// model differs from the manifest's is a configuration error.
    pub async fn query(&self, text: &str, k: usize, filters: &QueryFilters) -> Result<Vec<QueryHit>> {
        if text.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let Some(manifest) = self.store.manifest().await? else {
            return Ok(Vec::new());
        };
        if manifest.model_id != self.embedder.model_id() || manifest.dims != self.embedder.dims() {
            return Err(IndexError::Configuration(format!(
                "index was built with model '{}' ({} dims) but queries use '{}' ({} dims)",
                manifest.model_id,
                manifest.dims,
                self.embedder.model_id(),
                self.embedder.dims()
            )));
        }

        let vector = self.embed_query(text).await?;
        let hits = if self.dedupe_by_file {
            self.search_distinct_files(&vector, k, filters).await?
        } else {
            self.store.search(&vector, k, filters, self.metric).await?
        };

        Ok(hits.into_iter().map(QueryHit::from).collect())
    }

    /// Best chunk of each of the `k` best files. The candidate window doubles
    /// until it holds `k` distinct files or the store runs out of chunks.
    async fn search_distinct_files(
        &self,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<SearchHit>> {
        let mut fetch_k = k.saturating_mul(4);
        loop {
            let hits = self.store.search(vector, fetch_k, filters, self.metric).await?;
            let exhausted = hits.len() < fetch_k;
            let mut seen = HashSet::new();
            let best: Vec<SearchHit> = hits
                .into_iter()
                .filter(|h| seen.insert(h.file_path.clone()))
                .take(k)
                .collect();
            if best.len() == k || exhausted || fetch_k == usize::MAX {
                return Ok(best);
            }
            fetch_k = fetch_k.saturating_mul(2);
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let batch = embed_with_retry(self.embedder.as_ref(), &texts, &self.retry).await?;
        let vector = batch
            .items
            .into_iter()
            .next()
            .unwrap_or_else(|| Err(EmbedError::Rejected("empty provider response".to_string())))?;
        if vector.len() != self.embedder.dims() {
            return Err(EmbedError::DimensionMismatch {
                expected: self.embedder.dims(),
                got: vector.len(),
            }
            .into());
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::{ChunkRecord, FileRecord, Fingerprint, Manifest};
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    async fn seeded(embedder: &HashEmbedder) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .set_manifest(&Manifest::new(embedder.model_id(), embedder.dims()))
            .await
            .unwrap();
        let docs = [
            ("/n/a.txt", vec!["rust borrow checker lifetimes", "cooking pasta recipes"]),
            ("/n/b.txt", vec!["rust borrow checker rules", "garden tomatoes"]),
        ];
        for (i, (path, texts)) in docs.iter().enumerate() {
            let fp = Fingerprint {
                path: path.to_string(),
                hash: format!("h{}", i),
                size: 1,
                mtime: i as i64,
            };
            let chunks: Vec<ChunkRecord> = texts
                .iter()
                .enumerate()
                .map(|(seq, t)| ChunkRecord {
                    file_path: path.to_string(),
                    seq,
                    text: t.to_string(),
                    span: Span { start: 0, end: t.len() },
                    vector: embedder.embed_one(t),
                    model_id: embedder.model_id().to_string(),
                })
                .collect();
            store
                .upsert_file(&FileRecord::indexed(&fp, "text/plain", embedder.model_id(), 10), &chunks)
                .await
                .unwrap();
        }
        store
    }

    fn engine(store: Arc<InMemoryStore>, embedder: HashEmbedder) -> QueryEngine {
        QueryEngine::new(store, Arc::new(embedder), &RetrievalConfig::default(), retry())
    }

    #[tokio::test]
    async fn best_match_ranks_first() {
        let embedder = HashEmbedder::new(64);
        let store = seeded(&embedder).await;
        let hits = engine(store, embedder)
            .query("pasta recipes", 3, &QueryFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_text, "cooking pasta recipes");
        assert_eq!(hits[0].file_path, "/n/a.txt");
    }

    #[tokio::test]
    async fn dedupe_keeps_best_chunk_per_file() {
        let embedder = HashEmbedder::new(64);
        let store = seeded(&embedder).await;
        let hits = engine(store, embedder)
            .dedupe_by_file(true)
            .query("rust borrow checker", 10, &QueryFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk_text.starts_with("rust")));
    }

    #[tokio::test]
    async fn dedupe_looks_past_a_file_that_fills_the_first_window() {
        let embedder = HashEmbedder::new(64);
        let store = Arc::new(InMemoryStore::new());
        store
            .set_manifest(&Manifest::new(embedder.model_id(), embedder.dims()))
            .await
            .unwrap();
        let docs = [
            ("/n/a.txt", vec!["rust borrow checker"; 10]),
            ("/n/b.txt", vec!["rust garden"]),
        ];
        for (i, (path, texts)) in docs.iter().enumerate() {
            let fp = Fingerprint {
                path: path.to_string(),
                hash: format!("h{}", i),
                size: 1,
                mtime: 1,
            };
            let chunks: Vec<ChunkRecord> = texts
                .iter()
                .enumerate()
                .map(|(seq, t)| ChunkRecord {
                    file_path: path.to_string(),
                    seq,
                    text: t.to_string(),
                    span: Span { start: 0, end: t.len() },
                    vector: embedder.embed_one(t),
                    model_id: embedder.model_id().to_string(),
                })
                .collect();
            store
                .upsert_file(&FileRecord::indexed(&fp, "text/plain", embedder.model_id(), 10), &chunks)
                .await
                .unwrap();
        }

        let hits = engine(store, embedder)
            .dedupe_by_file(true)
            .query("rust borrow checker", 2, &QueryFilters::default())
            .await
            .unwrap();
        let files: Vec<&str> = hits.iter().map(|h| h.file_path.as_str()).collect();
        assert_eq!(files, vec!["/n/a.txt", "/n/b.txt"]);
    }

    #[tokio::test]
    async fn blank_query_and_empty_index_return_nothing() {
        let embedder = HashEmbedder::new(64);
        let store = seeded(&embedder).await;
        let eng = engine(store, HashEmbedder::new(64));
        assert!(eng.query("   ", 5, &QueryFilters::default()).await.unwrap().is_empty());

        let empty = engine(Arc::new(InMemoryStore::new()), HashEmbedder::new(64));
        assert!(empty.query("rust", 5, &QueryFilters::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_mismatch_is_configuration_error() {
        let embedder = HashEmbedder::new(64);
        let store = seeded(&embedder).await;
        let err = engine(store, HashEmbedder::new(32))
            .query("rust", 5, &QueryFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));
    }

    #[tokio::test]
    async fn filters_restrict_results() {
        let embedder = HashEmbedder::new(64);
        let store = seeded(&embedder).await;
        let filters = QueryFilters {
            path_prefix: Some("/n/b.txt".into()),
            ..Default::default()
        };
        let hits = engine(store, embedder)
            .query("rust", 10, &filters)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.file_path == "/n/b.txt"));
    }
}
