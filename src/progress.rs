//! Sync progress reporting.
//!
//! Reports observable progress during `sift sync` so users see what is being
//! scanned, how much is left, and when the index is up to date. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.
//!
//! The pipeline also keeps a [`LiveProgress`] snapshot that `status()` can
//! read while a pass is running.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Phase of a sync pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    /// Walking roots. Total unknown.
    Discovering,
    /// Hashing candidates and diffing against the store.
    Fingerprinting,
    /// Classify, extract, chunk, embed and write changed files.
    Processing,
    /// Tombstoning removed files and stamping the manifest.
    Finalizing,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Discovering => "discovering",
            SyncPhase::Fingerprinting => "fingerprinting",
            SyncPhase::Processing => "processing",
            SyncPhase::Finalizing => "finalizing",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => SyncPhase::Discovering,
            2 => SyncPhase::Fingerprinting,
            3 => SyncPhase::Processing,
            4 => SyncPhase::Finalizing,
            _ => SyncPhase::Idle,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            SyncPhase::Idle => 0,
            SyncPhase::Discovering => 1,
            SyncPhase::Fingerprinting => 2,
            SyncPhase::Processing => 3,
            SyncPhase::Finalizing => 4,
        }
    }
}

/// A single progress event for sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    Discovering { roots: usize },
    /// Diff finished: how much work the pass has.
    Planned {
        candidates: u64,
        to_process: u64,
        removed: u64,
    },
    /// n files processed out of total.
    Processing { n: u64, total: u64 },
    Finished { indexed: u64, failed: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from pipeline tasks concurrently.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  processing  1,234 / 5,000 files".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Discovering { roots } => {
                format!("sync  discovering {} root(s)...\n", roots)
            }
            SyncProgressEvent::Planned {
                candidates,
                to_process,
                removed,
            } => format!(
                "sync  {} files seen, {} to process, {} removed\n",
                format_number(*candidates),
                format_number(*to_process),
                format_number(*removed)
            ),
            SyncProgressEvent::Processing { n, total } => format!(
                "sync  processing  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Finished { indexed, failed } => format!(
                "sync  done  {} indexed, {} failed\n",
                format_number(*indexed),
                format_number(*failed)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Discovering { roots } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "roots": roots
            }),
            SyncProgressEvent::Planned {
                candidates,
                to_process,
                removed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "planned",
                "candidates": candidates,
                "to_process": to_process,
                "removed": removed
            }),
            SyncProgressEvent::Processing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Finished { indexed, failed } => serde_json::json!({
                "event": "progress",
                "phase": "finished",
                "indexed": indexed,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Arc<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

/// Point-in-time view of a running (or the last) pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: SyncPhase,
    pub processed: u64,
    pub total: u64,
}

/// Lock-free progress counters shared between pipeline tasks and readers.
#[derive(Debug, Default)]
pub struct LiveProgress {
    phase: AtomicU8,
    processed: AtomicU64,
    total: AtomicU64,
}

impl LiveProgress {
    pub fn set_phase(&self, phase: SyncPhase) {
        self.phase.store(phase.to_u8(), Ordering::SeqCst);
    }

    /// Start counting a new batch of `total` units.
    pub fn begin(&self, phase: SyncPhase, total: u64) {
        self.processed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.set_phase(phase);
    }

    /// Record one unit done; returns the new count.
    pub fn advance(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: SyncPhase::from_u8(self.phase.load(Ordering::SeqCst)),
            processed: self.processed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn live_progress_counts() {
        let live = LiveProgress::default();
        assert_eq!(live.snapshot().phase, SyncPhase::Idle);
        live.begin(SyncPhase::Processing, 3);
        live.advance();
        assert_eq!(live.advance(), 2);
        assert_eq!(
            live.snapshot(),
            ProgressSnapshot {
                phase: SyncPhase::Processing,
                processed: 2,
                total: 3
            }
        );
        live.set_phase(SyncPhase::Idle);
        assert_eq!(live.snapshot().phase, SyncPhase::Idle);
    }

    #[test]
    fn progress_mode_parse() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
