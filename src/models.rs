//! Core data models used throughout sift.
//!
//! These types represent the file records, chunk records, manifest, and
//! search hits that flow through the indexing and retrieval pipeline.

use serde::Serialize;
use std::path::Path;

use crate::error::FailureKind;

/// Version of the persisted schema this binary reads and writes.
pub const SCHEMA_VERSION: i64 = 1;

/// Indexing status of a [`FileRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Indexed,
    Failed,
    Deleted,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Indexed => "indexed",
            FileStatus::Failed => "failed",
            FileStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FileStatus::Pending),
            "indexed" => Some(FileStatus::Indexed),
            "failed" => Some(FileStatus::Failed),
            "deleted" => Some(FileStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a file failed, as recorded on its [`FileRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Identity of one version of a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Absolute path.
    pub path: String,
    /// Hex SHA-256 of the raw bytes.
    pub hash: String,
    pub size: u64,
    /// Last-modified time, Unix seconds.
    pub mtime: i64,
}

/// Persisted record for one file path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub mtime: i64,
    pub media_type: Option<String>,
    pub status: FileStatus,
    pub failure: Option<Failure>,
    /// Model the stored chunks were embedded with. Set only on indexed records.
    pub model_id: Option<String>,
    pub last_indexed_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl FileRecord {
    /// A fresh record for a fingerprint that has not been processed yet.
    pub fn pending(fp: &Fingerprint) -> Self {
        Self {
            path: fp.path.clone(),
            hash: fp.hash.clone(),
            size: fp.size,
            mtime: fp.mtime,
            media_type: None,
            status: FileStatus::Pending,
            failure: None,
            model_id: None,
            last_indexed_at: None,
            deleted_at: None,
        }
    }

    pub fn indexed(fp: &Fingerprint, media_type: &str, model_id: &str, at: i64) -> Self {
        Self {
            media_type: Some(media_type.to_string()),
            status: FileStatus::Indexed,
            model_id: Some(model_id.to_string()),
            last_indexed_at: Some(at),
            ..Self::pending(fp)
        }
    }

    /// Indexed, with chunks embedded by some model other than `model_id`.
    pub fn is_stale(&self, model_id: &str) -> bool {
        self.status == FileStatus::Indexed && self.model_id.as_deref() != Some(model_id)
    }

    pub fn failed(fp: &Fingerprint, media_type: Option<String>, failure: Failure) -> Self {
        Self {
            media_type,
            status: FileStatus::Failed,
            failure: Some(failure),
            ..Self::pending(fp)
        }
    }
}

/// Byte range of a chunk within the extracted text of its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// A segment of extracted text before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position of the chunk within its file, starting at 0.
    pub seq: usize,
    pub text: String,
    pub span: Span,
}

/// A persisted, embedded chunk. Owned by exactly one [`FileRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub file_path: String,
    pub seq: usize,
    pub text: String,
    pub span: Span,
    pub vector: Vec<f32>,
    pub model_id: String,
}

/// Process-wide persisted index state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub model_id: String,
    pub dims: usize,
    pub schema_version: i64,
    pub last_full_scan: Option<i64>,
    /// A model switch is in progress: some indexed files may still carry
    /// chunks from the previous model. Cleared by the first complete pass
    /// that leaves no such file behind.
    pub reembed_pending: bool,
}

impl Manifest {
    pub fn new(model_id: &str, dims: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dims,
            schema_version: SCHEMA_VERSION,
            last_full_scan: None,
            reembed_pending: false,
        }
    }
}

/// Filter for [`IndexStore::list_files`](crate::store::IndexStore::list_files).
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Only records under one of these paths (file or directory). Empty = all.
    pub roots: Vec<String>,
    pub status: Option<FileStatus>,
}

impl FileFilter {
    pub fn matches(&self, record: &FileRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        self.roots.is_empty() || self.roots.iter().any(|r| path_has_prefix(&record.path, r))
    }
}

/// Structured predicate applied to search candidates.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Only files at or below this path (matched per path component).
    pub path_prefix: Option<String>,
    /// Only files with exactly this media type.
    pub media_type: Option<String>,
    /// Only files indexed at or after this Unix timestamp.
    pub indexed_after: Option<i64>,
    /// Only files modified at or after this Unix timestamp.
    pub modified_after: Option<i64>,
}

impl SearchFilter {
    pub fn matches(&self, record: &FileRecord) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !path_has_prefix(&record.path, prefix) {
                return false;
            }
        }
        if let Some(mt) = &self.media_type {
            if record.media_type.as_deref() != Some(mt.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.indexed_after {
            if record.last_indexed_at.map_or(true, |ts| ts < after) {
                return false;
            }
        }
        if let Some(after) = self.modified_after {
            if record.mtime < after {
                return false;
            }
        }
        true
    }
}

/// A chunk returned by [`IndexStore::search`](crate::store::IndexStore::search).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub file_path: String,
    pub seq: usize,
    pub text: String,
    pub span: Span,
    /// Similarity score; larger is better for every metric.
    pub score: f64,
    pub media_type: Option<String>,
    pub file_mtime: i64,
}

/// Vector similarity used to rank search candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Dot,
    /// Scored as `1 / (1 + distance)` so that larger is better.
    Euclidean,
}

impl Metric {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Metric::Cosine),
            "dot" => Some(Metric::Dot),
            "euclidean" => Some(Metric::Euclidean),
            _ => None,
        }
    }
}

/// Per-status counts and totals for `status()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub pending: u64,
    pub indexed: u64,
    pub failed: u64,
    pub deleted: u64,
    pub chunks: u64,
}

impl StoreStats {
    pub fn files(&self) -> u64 {
        self.pending + self.indexed + self.failed + self.deleted
    }
}

/// Component-aware prefix test: `/a/b` covers `/a/b` and `/a/b/c`, not `/a/bc`.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    Path::new(path).starts_with(Path::new(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> FileRecord {
        FileRecord::indexed(
            &Fingerprint {
                path: path.to_string(),
                hash: "h".into(),
                size: 1,
                mtime: 100,
            },
            "text/plain",
            "m",
            200,
        )
    }

    #[test]
    fn status_string_roundtrip() {
        for s in [
            FileStatus::Pending,
            FileStatus::Indexed,
            FileStatus::Failed,
            FileStatus::Deleted,
        ] {
            assert_eq!(FileStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn prefix_is_component_aware() {
        assert!(path_has_prefix("/a/b/c.txt", "/a/b"));
        assert!(path_has_prefix("/a/b", "/a/b"));
        assert!(!path_has_prefix("/a/bc/d.txt", "/a/b"));
    }

    #[test]
    fn search_filter_predicates() {
        let rec = record("/docs/notes/a.txt");
        assert!(SearchFilter::default().matches(&rec));

        let by_prefix = SearchFilter {
            path_prefix: Some("/docs".into()),
            ..Default::default()
        };
        assert!(by_prefix.matches(&rec));

        let by_type = SearchFilter {
            media_type: Some("application/pdf".into()),
            ..Default::default()
        };
        assert!(!by_type.matches(&rec));

        let recent = SearchFilter {
            indexed_after: Some(201),
            ..Default::default()
        };
        assert!(!recent.matches(&rec));

        let modified = SearchFilter {
            modified_after: Some(100),
            ..Default::default()
        };
        assert!(modified.matches(&rec));
    }

    #[test]
    fn file_filter_roots_and_status() {
        let rec = record("/docs/a.txt");
        let f = FileFilter {
            roots: vec!["/other".into(), "/docs".into()],
            status: Some(FileStatus::Indexed),
        };
        assert!(f.matches(&rec));
        let f = FileFilter {
            roots: vec![],
            status: Some(FileStatus::Failed),
        };
        assert!(!f.matches(&rec));
    }

    #[test]
    fn stale_only_when_indexed_under_another_model() {
        let rec = record("/docs/a.txt");
        assert!(!rec.is_stale("m"));
        assert!(rec.is_stale("other"));

        let failed = FileRecord::failed(
            &Fingerprint {
                path: "/docs/b.txt".into(),
                hash: "h".into(),
                size: 1,
                mtime: 1,
            },
            None,
            Failure::new(FailureKind::Transient, "503"),
        );
        assert!(!failed.is_stale("other"));
    }
}
