//! Index status and health overview.
//!
//! Summarizes what is indexed: file counts per status, chunk count, the
//! manifest (model, schema, last full scan), failures grouped by kind and,
//! when a pass is running in this process, its live progress. Used by
//! `sift status`.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::models::{FileFilter, FileStatus, Manifest, StoreStats};
use crate::progress::{format_number, LiveProgress, ProgressSnapshot, SyncPhase};
use crate::store::IndexStore;

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub stats: StoreStats,
    pub manifest: Option<Manifest>,
    /// Failed files per failure kind.
    pub failures_by_kind: BTreeMap<String, u64>,
    /// Indexed files whose chunks were embedded with a model other than the manifest's.
    pub stale_files: u64,
    /// Present only while a pass is running.
    pub progress: Option<ProgressSnapshot>,
}

/// Gather the current status of `store`, including `live` progress if a
/// pass is in flight.
pub async fn status(
    store: &dyn IndexStore,
    live: Option<&LiveProgress>,
) -> Result<IndexStatus, StoreError> {
    let stats = store.stats().await?;
    let manifest = store.manifest().await?;

    let mut failures_by_kind = BTreeMap::new();
    if stats.failed > 0 {
        let failed = store
            .list_files(&FileFilter {
                roots: Vec::new(),
                status: Some(FileStatus::Failed),
            })
            .await?;
        for record in failed {
            let kind = record
                .failure
                .map(|f| f.kind.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            *failures_by_kind.entry(kind).or_insert(0) += 1;
        }
    }

    let mut stale_files = 0;
    if let Some(m) = &manifest {
        if stats.indexed > 0 {
            let indexed = store
                .list_files(&FileFilter {
                    roots: Vec::new(),
                    status: Some(FileStatus::Indexed),
                })
                .await?;
            stale_files = indexed.iter().filter(|r| r.is_stale(&m.model_id)).count() as u64;
        }
    }

    let progress = live
        .map(LiveProgress::snapshot)
        .filter(|s| s.phase != SyncPhase::Idle);

    Ok(IndexStatus {
        stats,
        manifest,
        failures_by_kind,
        stale_files,
        progress,
    })
}

impl IndexStatus {
    /// Human-readable multi-line summary.
    pub fn render(&self, now: i64) -> String {
        let mut out = String::new();
        let s = &self.stats;
        out.push_str("sift status\n");
        match &self.manifest {
            Some(m) => {
                out.push_str(&format!("  model:       {} ({} dims)\n", m.model_id, m.dims));
                out.push_str(&format!("  schema:      v{}\n", m.schema_version));
                let last = m
                    .last_full_scan
                    .map(|ts| format_ts_relative(ts, now))
                    .unwrap_or_else(|| "never".to_string());
                out.push_str(&format!("  last scan:   {}\n", last));
                if m.reembed_pending || self.stale_files > 0 {
                    out.push_str(&format!(
                        "  re-embed:    pending ({} files on an older model)\n",
                        format_number(self.stale_files)
                    ));
                }
            }
            None => out.push_str("  index not initialized (run `sift sync`)\n"),
        }
        out.push_str(&format!("  files:       {}\n", format_number(s.files())));
        out.push_str(&format!("    indexed:   {}\n", format_number(s.indexed)));
        out.push_str(&format!("    failed:    {}\n", format_number(s.failed)));
        for (kind, n) in &self.failures_by_kind {
            out.push_str(&format!("      {}: {}\n", kind, format_number(*n)));
        }
        out.push_str(&format!("    pending:   {}\n", format_number(s.pending)));
        out.push_str(&format!("    deleted:   {}\n", format_number(s.deleted)));
        out.push_str(&format!("  chunks:      {}\n", format_number(s.chunks)));
        if let Some(p) = &self.progress {
            out.push_str(&format!(
                "  sync:        {} {} / {}\n",
                p.phase.as_str(),
                format_number(p.processed),
                format_number(p.total)
            ));
        }
        out
    }
}

pub fn format_ts_relative(ts: i64, now: i64) -> String {
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::models::{Failure, FileRecord, Fingerprint};
    use crate::store::InMemoryStore;

    fn fp(path: &str) -> Fingerprint {
        Fingerprint {
            path: path.into(),
            hash: "h".into(),
            size: 1,
            mtime: 1,
        }
    }

    #[test]
    fn relative_timestamps() {
        assert_eq!(format_ts_relative(1000, 1030), "just now");
        assert_eq!(format_ts_relative(1000, 1000 + 120), "2 mins ago");
        assert_eq!(format_ts_relative(1000, 1000 + 3600), "1 hour ago");
        assert_eq!(format_ts_relative(0, 86400 * 3), "3 days ago");
        assert_eq!(format_ts_relative(0, 86400 * 60), "1970-01-01 00:00");
    }

    #[tokio::test]
    async fn status_counts_and_failure_kinds() {
        let store = InMemoryStore::new();
        store.set_manifest(&Manifest::new("m", 4)).await.unwrap();
        store
            .upsert_file(&FileRecord::indexed(&fp("/a"), "text/plain", "m", 1), &[])
            .await
            .unwrap();
        for path in ["/b", "/c"] {
            let failure = Failure::new(FailureKind::CorruptFile, "bad");
            store
                .upsert_file(&FileRecord::failed(&fp(path), None, failure), &[])
                .await
                .unwrap();
        }

        let live = LiveProgress::default();
        let st = status(&store, Some(&live)).await.unwrap();
        assert_eq!((st.stats.indexed, st.stats.failed), (1, 2));
        assert_eq!(st.failures_by_kind.get("CorruptFile"), Some(&2));
        assert!(st.progress.is_none());

        live.begin(SyncPhase::Processing, 5);
        let st = status(&store, Some(&live)).await.unwrap();
        assert_eq!(st.progress.map(|p| p.total), Some(5));

        let text = st.render(10);
        assert!(text.contains("model:       m (4 dims)"));
        assert!(text.contains("last scan:   never"));
        assert!(text.contains("processing 0 / 5"));
        assert!(!text.contains("re-embed"));
    }

    #[tokio::test]
    async fn status_counts_files_left_on_an_older_model() {
        let store = InMemoryStore::new();
        let mut manifest = Manifest::new("new", 4);
        manifest.reembed_pending = true;
        store.set_manifest(&manifest).await.unwrap();
        store
            .upsert_file(&FileRecord::indexed(&fp("/a"), "text/plain", "old", 1), &[])
            .await
            .unwrap();
        store
            .upsert_file(&FileRecord::indexed(&fp("/b"), "text/plain", "new", 1), &[])
            .await
            .unwrap();

        let st = status(&store, None).await.unwrap();
        assert_eq!(st.stale_files, 1);
        assert!(st.render(10).contains("re-embed:    pending (1 files on an older model)"));
    }
}
