//! Storage abstraction for the index.
//!
//! The [`IndexStore`] trait is the system of record for file records, their
//! chunks and vectors, and the index [`Manifest`]. Two backends ship:
//! [`SqliteStore`] (persistent, used by the CLI) and [`InMemoryStore`]
//! (tests and embedding in other tools).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Guarantees
//!
//! - [`upsert_file`](IndexStore::upsert_file) writes a file record and
//!   replaces its full chunk set as one unit. Readers observe either the old
//!   unit or the new one.
//! - [`search`](IndexStore::search) only considers chunks tagged with the
//!   manifest's model id. Without a manifest nothing matches.
//! - Deleting a file record deletes its chunks.

pub mod memory;
pub mod sqlite;
#[cfg(test)]
pub(crate) mod tests_support;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::embedding::{cosine_similarity, dot_product, euclidean_distance};
use crate::error::StoreError;
use crate::models::{
    ChunkRecord, FileFilter, FileRecord, Manifest, Metric, SearchFilter, SearchHit, StoreStats,
};

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`manifest`](IndexStore::manifest) / [`set_manifest`](IndexStore::set_manifest) | Read / write the index manifest |
/// | [`upsert_file`](IndexStore::upsert_file) | Write a file record and replace its chunks atomically |
/// | [`delete_file`](IndexStore::delete_file) | Remove a record and its chunks |
/// | [`get_file`](IndexStore::get_file) / [`list_files`](IndexStore::list_files) | Read records |
/// | [`chunks_for`](IndexStore::chunks_for) | A file's chunks in sequence order |
/// | [`search`](IndexStore::search) | Top-k nearest chunks under a filter |
/// | [`mark_deleted`](IndexStore::mark_deleted) | Tombstone a record and purge its chunks |
/// | [`touch_file`](IndexStore::touch_file) | Refresh the stored mtime only |
/// | [`files_with_hash`](IndexStore::files_with_hash) | Records sharing a content hash |
/// | [`gc_deleted`](IndexStore::gc_deleted) | Purge old tombstones |
/// | [`stats`](IndexStore::stats) | Counts per status and chunk total |
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn manifest(&self) -> Result<Option<Manifest>, StoreError>;

    async fn set_manifest(&self, manifest: &Manifest) -> Result<(), StoreError>;

    /// Insert or replace `record` and replace all of its chunks with `chunks`.
    async fn upsert_file(&self, record: &FileRecord, chunks: &[ChunkRecord])
        -> Result<(), StoreError>;

    /// Returns `true` if a record existed.
    async fn delete_file(&self, path: &str) -> Result<bool, StoreError>;

    async fn get_file(&self, path: &str) -> Result<Option<FileRecord>, StoreError>;

    /// Records matching `filter`, ordered by path.
    async fn list_files(&self, filter: &FileFilter) -> Result<Vec<FileRecord>, StoreError>;

    async fn chunks_for(&self, path: &str) -> Result<Vec<ChunkRecord>, StoreError>;

    /// The `k` best-scoring chunks. Ties go to the most recently modified
    /// file, then path, then sequence.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
        metric: Metric,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Set status `deleted` and purge the record's chunks in one unit.
    async fn mark_deleted(&self, path: &str, at: i64) -> Result<(), StoreError>;

    async fn touch_file(&self, path: &str, mtime: i64) -> Result<(), StoreError>;

    async fn files_with_hash(&self, hash: &str) -> Result<Vec<FileRecord>, StoreError>;

    /// Purge `deleted` records whose `deleted_at` is before `older_than`.
    async fn gc_deleted(&self, older_than: i64) -> Result<u64, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Similarity of `v` to `query`; larger is better for every metric.
pub fn score(metric: Metric, query: &[f32], v: &[f32]) -> f64 {
    match metric {
        Metric::Cosine => cosine_similarity(query, v) as f64,
        Metric::Dot => dot_product(query, v) as f64,
        Metric::Euclidean => 1.0 / (1.0 + euclidean_distance(query, v) as f64),
    }
}

fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.file_mtime.cmp(&a.file_mtime))
        .then_with(|| a.file_path.cmp(&b.file_path))
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Sort candidates best-first and keep the top `k`.
pub fn rank(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.retain(|h| !h.score.is_nan());
    hits.sort_by(compare_hits);
    hits.truncate(k);
    hits
}
