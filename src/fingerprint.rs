//! Content fingerprinting and snapshot diffing.
//!
//! [`fingerprint_file`] computes the identity of one file version: its
//! absolute path, SHA-256 content hash, byte size and mtime. [`diff`]
//! partitions an observed snapshot against the stored [`FileRecord`]s.
//!
//! A file is `unchanged` only if both size and hash match the stored record.
//! The mtime never decides on its own: a changed mtime with identical content
//! is carried along so the caller can refresh the record without
//! reprocessing the file. A record embedded under a model other than the
//! current one is reprocessed even when its content is unchanged.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::models::{path_has_prefix, FileRecord, FileStatus, Fingerprint};

/// Read size for hashing. Memory use is bounded by this, not the file size.
const HASH_BUF_BYTES: usize = 64 * 1024;

/// Stat and hash `path` on the blocking pool.
pub async fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprint> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_file_blocking(&path))
        .await
        .map_err(std::io::Error::other)?
}

pub fn fingerprint_file_blocking(path: &Path) -> std::io::Result<Fingerprint> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()
        .unwrap_or(UNIX_EPOCH)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_BYTES];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }

    Ok(Fingerprint {
        path: path.to_string_lossy().to_string(),
        hash: hex::encode(hasher.finalize()),
        size,
        mtime,
    })
}

/// Knobs that widen what counts as changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffPolicy<'a> {
    /// Treat every observed file as modified.
    pub force: bool,
    /// Reprocess files that failed permanently even if their content is the same.
    pub retry_failed: bool,
    /// Current embedding model. Indexed records tagged with another model
    /// are reprocessed.
    pub model_id: Option<&'a str>,
}

/// Paths that could not be inspected during a pass. Stored records at or
/// under them are kept as they are.
#[derive(Debug, Clone, Default)]
pub struct Unreadable {
    /// Files that were listed but could not be fingerprinted.
    pub files: HashSet<String>,
    /// Directories whose contents could not be listed.
    pub dirs: Vec<String>,
}

impl Unreadable {
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains(path) || self.dirs.iter().any(|dir| path_has_prefix(path, dir))
    }
}

/// An unchanged file whose stored mtime is out of date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Touch {
    pub path: String,
    pub mtime: i64,
}

/// Partition of an observed snapshot against stored records.
#[derive(Debug, Clone, Default)]
pub struct ScanDiff {
    pub unchanged: Vec<String>,
    /// Subset of `unchanged` whose mtime moved.
    pub touched: Vec<Touch>,
    pub new: Vec<Fingerprint>,
    pub modified: Vec<Fingerprint>,
    pub removed: Vec<String>,
}

/// Pure diff of `observed` against `stored`.
///
/// Records covered by `unreadable` are neither processed nor considered
/// removed.
pub fn diff(
    observed: &[Fingerprint],
    stored: &[FileRecord],
    unreadable: &Unreadable,
    policy: DiffPolicy<'_>,
) -> ScanDiff {
    let by_path: HashMap<&str, &FileRecord> =
        stored.iter().map(|r| (r.path.as_str(), r)).collect();
    let mut out = ScanDiff::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(observed.len());

    for fp in observed {
        seen.insert(fp.path.as_str());
        let Some(record) = by_path.get(fp.path.as_str()) else {
            out.new.push(fp.clone());
            continue;
        };
        if policy.force || needs_processing(fp, record, policy) {
            out.modified.push(fp.clone());
            continue;
        }
        out.unchanged.push(fp.path.clone());
        if record.mtime != fp.mtime {
            out.touched.push(Touch {
                path: fp.path.clone(),
                mtime: fp.mtime,
            });
        }
    }

    for record in stored {
        let path = record.path.as_str();
        if record.status != FileStatus::Deleted
            && !seen.contains(path)
            && !unreadable.contains(path)
        {
            out.removed.push(record.path.clone());
        }
    }

    out
}

fn needs_processing(fp: &Fingerprint, record: &FileRecord, policy: DiffPolicy<'_>) -> bool {
    match record.status {
        FileStatus::Deleted | FileStatus::Pending => return true,
        FileStatus::Indexed | FileStatus::Failed => {}
    }
    if record.size != fp.size || record.hash != fp.hash {
        return true;
    }
    if let Some(model_id) = policy.model_id {
        if record.is_stale(model_id) {
            return true;
        }
    }
    if record.status == FileStatus::Failed {
        let permanent = record
            .failure
            .as_ref()
            .map(|f| f.kind.is_permanent())
            .unwrap_or(false);
        return !permanent || policy.retry_failed;
    }
    false
}
