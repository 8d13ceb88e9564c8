//! Error taxonomy for indexing and retrieval.
//!
//! Errors fall into two groups. Per-file errors ([`FailureKind`]) are
//! recorded on the affected [`FileRecord`](crate::models::FileRecord) and
//! aggregated into the sync report; they never abort a pass. Pass-level
//! errors ([`IndexError`]) abort the current operation and surface to the
//! caller immediately.

use serde::Serialize;
use thiserror::Error;

/// Classification of a per-file failure.
///
/// Permanent kinds are not retried by the next `sync` unless the file's
/// content changes or the caller asks for it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// No extraction strategy exists for the detected media type.
    UnsupportedFormat,
    /// The file claims a supported type but could not be decoded.
    CorruptFile,
    /// The embedding provider failed in a way that may succeed later.
    Transient,
    /// An external call exceeded its time budget.
    Timeout,
    /// The embedding provider refused a segment (too long, bad input).
    Rejected,
    /// The file could not be read from disk.
    Io,
    /// The store rejected the write for this file.
    Storage,
}

impl FailureKind {
    pub fn is_permanent(self) -> bool {
        matches!(self, FailureKind::UnsupportedFormat | FailureKind::CorruptFile)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::UnsupportedFormat => "UnsupportedFormat",
            FailureKind::CorruptFile => "CorruptFile",
            FailureKind::Transient => "Transient",
            FailureKind::Timeout => "Timeout",
            FailureKind::Rejected => "Rejected",
            FailureKind::Io => "Io",
            FailureKind::Storage => "Storage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UnsupportedFormat" => Some(FailureKind::UnsupportedFormat),
            "CorruptFile" => Some(FailureKind::CorruptFile),
            "Transient" => Some(FailureKind::Transient),
            "Timeout" => Some(FailureKind::Timeout),
            "Rejected" => Some(FailureKind::Rejected),
            "Io" => Some(FailureKind::Io),
            "Storage" => Some(FailureKind::Storage),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by an [`IndexStore`](crate::store::IndexStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[cfg(test)]
    #[error("injected fault: {0}")]
    Injected(&'static str),
}

/// Pass-level errors returned by the pipeline and the query engine.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Misconfiguration that must be fixed before the operation can run,
    /// e.g. an embedding model that differs from the manifest.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbedError),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_kinds() {
        assert!(FailureKind::UnsupportedFormat.is_permanent());
        assert!(FailureKind::CorruptFile.is_permanent());
        assert!(!FailureKind::Transient.is_permanent());
        assert!(!FailureKind::Timeout.is_permanent());
        assert!(!FailureKind::Rejected.is_permanent());
        assert!(!FailureKind::Io.is_permanent());
        assert!(!FailureKind::Storage.is_permanent());
    }

    #[test]
    fn kind_string_roundtrip() {
        for kind in [
            FailureKind::UnsupportedFormat,
            FailureKind::CorruptFile,
            FailureKind::Transient,
            FailureKind::Timeout,
            FailureKind::Rejected,
            FailureKind::Io,
            FailureKind::Storage,
        ] {
            assert_eq!(FailureKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::parse("nope"), None);
    }
}
