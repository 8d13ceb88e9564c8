//! In-memory [`IndexStore`] implementation.
//!
//! All state sits behind one `std::sync::RwLock`, so every operation
//! (including the chunk replace in `upsert_file`) is a single critical
//! section. Search is brute force over all stored vectors.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{rank, score, IndexStore};
use crate::error::StoreError;
use crate::models::{
    ChunkRecord, FileFilter, FileRecord, FileStatus, Manifest, Metric, SearchFilter, SearchHit,
    StoreStats,
};

#[derive(Default)]
struct MemoryState {
    manifest: Option<Manifest>,
    files: BTreeMap<String, FileRecord>,
    chunks: HashMap<String, Vec<ChunkRecord>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn manifest(&self) -> Result<Option<Manifest>, StoreError> {
        Ok(self.read()?.manifest.clone())
    }

    async fn set_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        self.write()?.manifest = Some(manifest.clone());
        Ok(())
    }

    async fn upsert_file(
        &self,
        record: &FileRecord,
        chunks: &[ChunkRecord],
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.files.insert(record.path.clone(), record.clone());
        if chunks.is_empty() {
            state.chunks.remove(&record.path);
        } else {
            let mut sorted = chunks.to_vec();
            sorted.sort_by_key(|c| c.seq);
            state.chunks.insert(record.path.clone(), sorted);
        }
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        state.chunks.remove(path);
        Ok(state.files.remove(path).is_some())
    }

    async fn get_file(&self, path: &str) -> Result<Option<FileRecord>, StoreError> {
        Ok(self.read()?.files.get(path).cloned())
    }

    async fn list_files(&self, filter: &FileFilter) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self
            .read()?
            .files
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn chunks_for(&self, path: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        Ok(self.read()?.chunks.get(path).cloned().unwrap_or_default())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
        metric: Metric,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let state = self.read()?;
        let Some(manifest) = &state.manifest else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::new();
        for (path, chunks) in &state.chunks {
            let Some(file) = state.files.get(path) else {
                continue;
            };
            if file.status != FileStatus::Indexed || !filter.matches(file) {
                continue;
            }
            for chunk in chunks.iter().filter(|c| c.model_id == manifest.model_id) {
                hits.push(SearchHit {
                    file_path: path.clone(),
                    seq: chunk.seq,
                    text: chunk.text.clone(),
                    span: chunk.span,
                    score: score(metric, query, &chunk.vector),
                    media_type: file.media_type.clone(),
                    file_mtime: file.mtime,
                });
            }
        }
        Ok(rank(hits, k))
    }

    async fn mark_deleted(&self, path: &str, at: i64) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if let Some(record) = state.files.get_mut(path) {
            record.status = FileStatus::Deleted;
            record.deleted_at = Some(at);
            record.failure = None;
            record.model_id = None;
        }
        state.chunks.remove(path);
        Ok(())
    }

    async fn touch_file(&self, path: &str, mtime: i64) -> Result<(), StoreError> {
        if let Some(record) = self.write()?.files.get_mut(path) {
            record.mtime = mtime;
        }
        Ok(())
    }

    async fn files_with_hash(&self, hash: &str) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self
            .read()?
            .files
            .values()
            .filter(|r| r.hash == hash && r.status != FileStatus::Deleted)
            .cloned()
            .collect())
    }

    async fn gc_deleted(&self, older_than: i64) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let doomed: Vec<String> = state
            .files
            .values()
            .filter(|r| {
                r.status == FileStatus::Deleted && r.deleted_at.is_some_and(|t| t < older_than)
            })
            .map(|r| r.path.clone())
            .collect();
        for path in &doomed {
            state.files.remove(path);
            state.chunks.remove(path);
        }
        Ok(doomed.len() as u64)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.read()?;
        let mut stats = StoreStats::default();
        for record in state.files.values() {
            match record.status {
                FileStatus::Pending => stats.pending += 1,
                FileStatus::Indexed => stats.indexed += 1,
                FileStatus::Failed => stats.failed += 1,
                FileStatus::Deleted => stats.deleted += 1,
            }
        }
        stats.chunks = state.chunks.values().map(|c| c.len() as u64).sum();
        Ok(stats)
    }
}
