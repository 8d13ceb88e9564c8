//! SQLite-backed [`IndexStore`] implementation.
//!
//! Vectors are stored as little-endian `f32` BLOBs next to their chunk text
//! and scored in Rust. Multi-statement operations run in one transaction,
//! and `search` reads files and chunks from a single snapshot.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use super::{rank, score, IndexStore};
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{FailureKind, StoreError};
use crate::migrate;
use crate::models::{
    ChunkRecord, Failure, FileFilter, FileRecord, FileStatus, Manifest, Metric, SearchFilter,
    SearchHit, Span, StoreStats,
};

const FILE_COLUMNS: &str = "path, hash, size, mtime, media_type, status, error_kind, \
                            error_message, model_id, last_indexed_at, deleted_at";

pub struct SqliteStore {
    pool: SqlitePool,
    /// Fail `upsert_file` after the old chunks are deleted and before the new
    /// ones are inserted.
    #[cfg(test)]
    fail_mid_replace: std::sync::atomic::AtomicBool,
}

impl SqliteStore {
    /// Connect to the database at `path` and bring the schema up to date.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            #[cfg(test)]
            fail_mid_replace: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn fault_mid_replace(&self) -> Result<(), StoreError> {
        #[cfg(test)]
        if self
            .fail_mid_replace
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(StoreError::Injected("after chunk delete"));
        }
        Ok(())
    }
}

fn corrupt(table: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::CorruptRow {
        table,
        reason: reason.into(),
    }
}

fn row_to_file(row: &SqliteRow) -> Result<FileRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let status = FileStatus::parse(&status)
        .ok_or_else(|| corrupt("files", format!("unknown status '{}'", status)))?;

    let error_kind: Option<String> = row.try_get("error_kind")?;
    let failure = match error_kind {
        Some(kind) => {
            let kind = FailureKind::parse(&kind)
                .ok_or_else(|| corrupt("files", format!("unknown error kind '{}'", kind)))?;
            let message: Option<String> = row.try_get("error_message")?;
            Some(Failure::new(kind, message.unwrap_or_default()))
        }
        None => None,
    };

    let size: i64 = row.try_get("size")?;
    Ok(FileRecord {
        path: row.try_get("path")?,
        hash: row.try_get("hash")?,
        size: size.max(0) as u64,
        mtime: row.try_get("mtime")?,
        media_type: row.try_get("media_type")?,
        status,
        failure,
        model_id: row.try_get("model_id")?,
        last_indexed_at: row.try_get("last_indexed_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<ChunkRecord, StoreError> {
    let seq: i64 = row.try_get("seq")?;
    let start: i64 = row.try_get("span_start")?;
    let end: i64 = row.try_get("span_end")?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok(ChunkRecord {
        file_path: row.try_get("file_path")?,
        seq: seq as usize,
        text: row.try_get("text")?,
        span: Span {
            start: start as usize,
            end: end as usize,
        },
        vector: blob_to_vec(&blob),
        model_id: row.try_get("model_id")?,
    })
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn manifest(&self) -> Result<Option<Manifest>, StoreError> {
        let row = sqlx::query(
            "SELECT model_id, dims, schema_version, last_full_scan, reembed_pending \
             FROM manifest WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let dims: i64 = row.try_get("dims")?;
            Ok(Manifest {
                model_id: row.try_get("model_id")?,
                dims: dims as usize,
                schema_version: row.try_get("schema_version")?,
                last_full_scan: row.try_get("last_full_scan")?,
                reembed_pending: row.try_get("reembed_pending")?,
            })
        })
        .transpose()
    }

    async fn set_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO manifest (id, model_id, dims, schema_version, last_full_scan,
                                  reembed_pending)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                model_id = excluded.model_id,
                dims = excluded.dims,
                schema_version = excluded.schema_version,
                last_full_scan = excluded.last_full_scan,
                reembed_pending = excluded.reembed_pending
            "#,
        )
        .bind(&manifest.model_id)
        .bind(manifest.dims as i64)
        .bind(manifest.schema_version)
        .bind(manifest.last_full_scan)
        .bind(manifest.reembed_pending)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_file(
        &self,
        record: &FileRecord,
        chunks: &[ChunkRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (path, hash, size, mtime, media_type, status, error_kind,
                               error_message, model_id, last_indexed_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                hash = excluded.hash,
                size = excluded.size,
                mtime = excluded.mtime,
                media_type = excluded.media_type,
                status = excluded.status,
                error_kind = excluded.error_kind,
                error_message = excluded.error_message,
                model_id = excluded.model_id,
                last_indexed_at = excluded.last_indexed_at,
                deleted_at = excluded.deleted_at
            "#,
        )
        .bind(&record.path)
        .bind(&record.hash)
        .bind(record.size as i64)
        .bind(record.mtime)
        .bind(&record.media_type)
        .bind(record.status.as_str())
        .bind(record.failure.as_ref().map(|f| f.kind.as_str()))
        .bind(record.failure.as_ref().map(|f| f.message.as_str()))
        .bind(&record.model_id)
        .bind(record.last_indexed_at)
        .bind(record.deleted_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(&record.path)
            .execute(&mut *tx)
            .await?;

        // Dropping `tx` on error rolls the whole unit back.
        self.fault_mid_replace()?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (file_path, seq, text, span_start, span_end, model_id, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.path)
            .bind(chunk.seq as i64)
            .bind(&chunk.text)
            .bind(chunk.span.start as i64)
            .bind(chunk.span.end as i64)
            .bind(&chunk.model_id)
            .bind(vec_to_blob(&chunk.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_file(&self, path: &str) -> Result<Option<FileRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM files WHERE path = ?", FILE_COLUMNS))
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_file).transpose()
    }

    async fn list_files(&self, filter: &FileFilter) -> Result<Vec<FileRecord>, StoreError> {
        let rows = match filter.status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM files WHERE status = ? ORDER BY path",
                    FILE_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {} FROM files ORDER BY path", FILE_COLUMNS))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = row_to_file(row)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn chunks_for(&self, path: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT file_path, seq, text, span_start, span_end, model_id, embedding
            FROM chunks WHERE file_path = ? ORDER BY seq
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
        metric: Metric,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let Some(manifest) = self.manifest().await? else {
            return Ok(Vec::new());
        };

        // One read transaction: files and chunks come from the same snapshot.
        let mut tx = self.pool.begin().await?;

        let file_rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE status = 'indexed'",
            FILE_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await?;
        let mut files: HashMap<String, FileRecord> = HashMap::new();
        for row in &file_rows {
            let record = row_to_file(row)?;
            if filter.matches(&record) {
                files.insert(record.path.clone(), record);
            }
        }

        let mut hits = Vec::new();
        {
            let mut rows = sqlx::query(
                "SELECT file_path, seq, text, span_start, span_end, embedding \
                 FROM chunks WHERE model_id = ?",
            )
            .bind(&manifest.model_id)
            .fetch(&mut *tx);

            while let Some(row) = rows.try_next().await? {
                let path: String = row.try_get("file_path")?;
                let Some(file) = files.get(&path) else {
                    continue;
                };
                let blob: Vec<u8> = row.try_get("embedding")?;
                let seq: i64 = row.try_get("seq")?;
                let start: i64 = row.try_get("span_start")?;
                let end: i64 = row.try_get("span_end")?;
                hits.push(SearchHit {
                    score: score(metric, query, &blob_to_vec(&blob)),
                    file_path: path,
                    seq: seq as usize,
                    text: row.try_get("text")?,
                    span: Span {
                        start: start as usize,
                        end: end as usize,
                    },
                    media_type: file.media_type.clone(),
                    file_mtime: file.mtime,
                });
            }
        }

        tx.commit().await?;
        Ok(rank(hits, k))
    }

    async fn mark_deleted(&self, path: &str, at: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE files SET status = 'deleted', deleted_at = ?, error_kind = NULL, \
             error_message = NULL, model_id = NULL WHERE path = ?",
        )
        .bind(at)
        .bind(path)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn touch_file(&self, path: &str, mtime: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE files SET mtime = ? WHERE path = ?")
            .bind(mtime)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn files_with_hash(&self, hash: &str) -> Result<Vec<FileRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE hash = ? AND status != 'deleted' ORDER BY path",
            FILE_COLUMNS
        ))
        .bind(hash)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_file).collect()
    }

    async fn gc_deleted(&self, older_than: i64) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM files WHERE status = 'deleted' AND deleted_at < ?")
                .bind(older_than)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM files GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut stats = StoreStats::default();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match FileStatus::parse(&status) {
                Some(FileStatus::Pending) => stats.pending = n as u64,
                Some(FileStatus::Indexed) => stats.indexed = n as u64,
                Some(FileStatus::Failed) => stats.failed = n as u64,
                Some(FileStatus::Deleted) => stats.deleted = n as u64,
                None => return Err(corrupt("files", format!("unknown status '{}'", status))),
            }
        }
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        stats.chunks = chunks as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests_support::*;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("data/index.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        let (_tmp, store) = open_temp().await;
        run_contract(&store).await;
    }

    #[tokio::test]
    async fn reopen_keeps_data_and_migrations_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            let mut manifest = Manifest::new("m", 2);
            manifest.reembed_pending = true;
            store.set_manifest(&manifest).await.unwrap();
            let rec = FileRecord::indexed(&fp("/x/a", "h", 1), "text/plain", "m", 5);
            store
                .upsert_file(&rec, &[chunk("/x/a", 0, "t", vec![0.5, 0.5], "m")])
                .await
                .unwrap();
            store.close().await;
        }
        let store = SqliteStore::open(&path).await.unwrap();
        let manifest = store.manifest().await.unwrap().unwrap();
        assert_eq!(manifest.model_id, "m");
        assert!(manifest.reembed_pending);
        let record = store.get_file("/x/a").await.unwrap().unwrap();
        assert_eq!(record.model_id.as_deref(), Some("m"));
        assert_eq!(store.chunks_for("/x/a").await.unwrap()[0].vector, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn crash_between_delete_and_insert_keeps_prior_version() {
        let (_tmp, store) = open_temp().await;
        store.set_manifest(&Manifest::new("m", 2)).await.unwrap();

        let v1 = FileRecord::indexed(&fp("/x/a.txt", "v1", 1), "text/plain", "m", 10);
        store
            .upsert_file(
                &v1,
                &[
                    chunk(&v1.path, 0, "old zero", vec![1.0, 0.0], "m"),
                    chunk(&v1.path, 1, "old one", vec![0.0, 1.0], "m"),
                ],
            )
            .await
            .unwrap();

        store.fail_mid_replace.store(true, Ordering::SeqCst);
        let v2 = FileRecord::indexed(&fp("/x/a.txt", "v2", 2), "text/plain", "m", 20);
        let err = store
            .upsert_file(&v2, &[chunk(&v2.path, 0, "new", vec![1.0, 0.0], "m")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Injected(_)));
        store.fail_mid_replace.store(false, Ordering::SeqCst);

        let record = store.get_file(&v1.path).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Indexed);
        assert_eq!(record.hash, "v1");
        let chunks = store.chunks_for(&v1.path).await.unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
            vec!["old zero", "old one"]
        );
    }

    #[tokio::test]
    async fn corrupt_status_is_reported() {
        let (_tmp, store) = open_temp().await;
        sqlx::query("INSERT INTO files (path, hash, size, mtime, status) VALUES ('/p', 'h', 1, 1, 'weird')")
            .execute(store.pool())
            .await
            .unwrap();
        let err = store.get_file("/p").await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { table: "files", .. }));
    }
}
