use sqlx::SqlitePool;

use crate::error::StoreError;

/// Create the schema if it does not exist. Safe to run on every open.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    // Create files table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            media_type TEXT,
            status TEXT NOT NULL,
            error_kind TEXT,
            error_message TEXT,
            model_id TEXT,
            last_indexed_at INTEGER,
            deleted_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            file_path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
            seq INTEGER NOT NULL,
            text TEXT NOT NULL,
            span_start INTEGER NOT NULL,
            span_end INTEGER NOT NULL,
            model_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (file_path, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create manifest table (single row)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manifest (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            model_id TEXT NOT NULL,
            dims INTEGER NOT NULL,
            schema_version INTEGER NOT NULL,
            last_full_scan INTEGER,
            reembed_pending INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_model_id ON chunks(model_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_status ON files(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash)")
        .execute(pool)
        .await?;

    Ok(())
}
