//! Incremental indexing pipeline.
//!
//! One [`IndexingPipeline::sync`] call is a *pass* over a set of roots:
//!
//! ```text
//! manifest check → discover → fingerprint → diff → touch
//!     → process new/modified (classify → extract → chunk → embed → upsert)
//!     → tombstone removed → stamp last_full_scan
//! ```
//!
//! Unchanged files are never classified, extracted or embedded. Files are
//! processed with bounded parallelism (`index.concurrency`), provider calls
//! are limited by a shared semaphore (`embedding.max_concurrent_requests`),
//! and at most one update per path is in flight at a time.
//!
//! Per-file failures are recorded on the file's record and collected in the
//! [`SyncReport`]; only configuration and store-level errors abort a pass.
//!
//! A model switch (`reembed`) marks the manifest as pending. Every pass
//! reprocesses indexed files whose chunks carry another model, and the first
//! complete pass that leaves none behind clears the mark.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::classify::{read_head, Classification, SniffingClassifier, TypeClassifier};
use crate::config::Config;
use crate::embedding::{embed_with_retry, EmbedError, EmbeddingClient, RetryPolicy};
use crate::error::{FailureKind, IndexError, Result};
use crate::extract::{DocumentExtractor, TextExtractor};
use crate::fingerprint::{self, fingerprint_file, DiffPolicy, Unreadable};
use crate::models::{
    ChunkRecord, Failure, FileFilter, FileRecord, FileStatus, Fingerprint, Manifest,
    SCHEMA_VERSION,
};
use crate::progress::{LiveProgress, NoProgress, SyncPhase, SyncProgressEvent, SyncProgressReporter};
use crate::store::IndexStore;
use crate::walk::Walker;

/// Tuning knobs for a pass, derived from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Files in flight at once.
    pub concurrency: usize,
    /// Bound on each classification and extraction call.
    pub extract_timeout: Duration,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub max_concurrent_requests: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.index.concurrency.max(1),
            extract_timeout: Duration::from_secs(config.index.extract_timeout_secs),
            retry: RetryPolicy::from_config(&config.embedding),
            batch_size: config.embedding.batch_size.max(1),
            max_concurrent_requests: config.embedding.max_concurrent_requests.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Reprocess every observed file regardless of fingerprint.
    pub force: bool,
    /// Also retry files that failed with a permanent reason.
    pub retry_failed: bool,
    /// Accept a model change: rewrite the manifest and re-embed everything.
    pub reembed: bool,
    /// Report what would change without classifying, extracting, embedding or writing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileFailure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncReport {
    pub pass_id: Uuid,
    pub dry_run: bool,
    /// Files written as indexed (planned, on a dry run).
    pub indexed: u64,
    pub failed: u64,
    /// Unchanged files that were not reprocessed.
    pub skipped: u64,
    pub deleted: u64,
    /// Unchanged files whose stored mtime was refreshed.
    pub touched: u64,
    pub chunks_written: u64,
    /// Newly indexed files whose content already exists under another path.
    pub duplicates: u64,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

impl SyncReport {
    fn new(pass_id: Uuid, dry_run: bool) -> Self {
        Self {
            pass_id,
            dry_run,
            indexed: 0,
            failed: 0,
            skipped: 0,
            deleted: 0,
            touched: 0,
            chunks_written: 0,
            duplicates: 0,
            failures: Vec::new(),
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    fn record_failure(&mut self, failure: FileFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }
}

enum FileOutcome {
    Indexed { chunks: usize, duplicate: bool },
    /// Committed by a concurrent pass while this one waited for the path.
    Unchanged,
    Failed(FileFailure),
    Cancelled,
}

pub struct IndexingPipeline {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn EmbeddingClient>,
    classifier: Arc<dyn TypeClassifier>,
    extractor: Arc<dyn TextExtractor>,
    walker: Walker,
    chunker: Chunker,
    settings: PipelineSettings,
    embed_permits: Arc<Semaphore>,
    path_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    reporter: Arc<dyn SyncProgressReporter>,
    live: Arc<LiveProgress>,
}

impl IndexingPipeline {
    /// A pipeline with the default classifier and extractor.
    pub fn new(
        config: &Config,
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        let settings = PipelineSettings::from_config(config);
        Ok(Self {
            store,
            embedder,
            classifier: Arc::new(SniffingClassifier),
            extractor: Arc::new(DocumentExtractor::new(config.index.max_file_bytes)),
            walker: Walker::new(&config.index)?,
            chunker: Chunker::new(&config.chunking),
            embed_permits: Arc::new(Semaphore::new(settings.max_concurrent_requests)),
            settings,
            path_locks: Mutex::new(HashMap::new()),
            reporter: Arc::new(NoProgress),
            live: Arc::new(LiveProgress::default()),
        })
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.embed_permits = Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1)));
        self.settings = settings;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TypeClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn SyncProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Shared handle to the live progress counters of this pipeline.
    pub fn progress(&self) -> Arc<LiveProgress> {
        Arc::clone(&self.live)
    }

    /// Run one pass over `roots`.
    pub async fn sync(
        &self,
        roots: &[PathBuf],
        options: SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let pass_id = Uuid::new_v4();
        let span = info_span!("sync", pass_id = %pass_id, dry_run = options.dry_run);
        let result = self
            .run_pass(pass_id, roots, options, cancel)
            .instrument(span)
            .await;
        self.live.set_phase(SyncPhase::Idle);
        result
    }

    async fn run_pass(
        &self,
        pass_id: Uuid,
        roots: &[PathBuf],
        options: SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::new(pass_id, options.dry_run);

        let reembed_all = self.check_manifest(options).await?;

        // Discovery
        let roots = Walker::resolve_roots(roots)?;
        self.live.begin(SyncPhase::Discovering, 0);
        self.reporter.report(SyncProgressEvent::Discovering { roots: roots.len() });
        let discovery = self.walker.discover(&roots);
        debug!(
            candidates = discovery.files.len(),
            unlistable = discovery.unreadable.len(),
            "discovery finished"
        );

        // Fingerprint
        self.live
            .begin(SyncPhase::Fingerprinting, discovery.files.len() as u64);
        let (observed, unreadable_files) = self.fingerprint_all(discovery.files).await;
        for (path, message) in &unreadable_files {
            warn!(path = %path, error = %message, "file could not be read");
            report.record_failure(FileFailure {
                path: path.clone(),
                kind: FailureKind::Io,
                message: message.clone(),
            });
        }
        for (dir, message) in &discovery.unreadable {
            report.record_failure(FileFailure {
                path: dir.to_string_lossy().to_string(),
                kind: FailureKind::Io,
                message: message.clone(),
            });
        }
        let unreadable = Unreadable {
            files: unreadable_files.keys().cloned().collect(),
            dirs: discovery
                .unreadable
                .iter()
                .map(|(dir, _)| dir.to_string_lossy().to_string())
                .collect(),
        };

        // Diff
        let filter = FileFilter {
            roots: roots
                .iter()
                .map(|r| r.to_string_lossy().to_string())
                .collect(),
            status: None,
        };
        let stored = self.store.list_files(&filter).await?;
        let force = options.force || reembed_all;
        let policy = DiffPolicy {
            force,
            retry_failed: options.retry_failed,
            model_id: Some(self.embedder.model_id()),
        };
        let diff = fingerprint::diff(&observed, &stored, &unreadable, policy);
        let work: Vec<Fingerprint> = diff.new.into_iter().chain(diff.modified).collect();
        report.skipped = diff.unchanged.len() as u64;
        self.reporter.report(SyncProgressEvent::Planned {
            candidates: observed.len() as u64,
            to_process: work.len() as u64,
            removed: diff.removed.len() as u64,
        });
        info!(
            to_process = work.len(),
            unchanged = report.skipped,
            removed = diff.removed.len(),
            "diff computed"
        );

        if options.dry_run {
            report.indexed = work.len() as u64;
            report.deleted = diff.removed.len() as u64;
            report.touched = diff.touched.len() as u64;
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        self.record_unreadable(&unreadable_files, &stored).await;
        for touch in &diff.touched {
            self.store.touch_file(&touch.path, touch.mtime).await?;
        }
        report.touched = diff.touched.len() as u64;

        // Process
        let total = work.len() as u64;
        self.live.begin(SyncPhase::Processing, total);
        let outcomes: Vec<FileOutcome> = stream::iter(work)
            .map(|fp| async move {
                if cancel.is_cancelled() {
                    return FileOutcome::Cancelled;
                }
                let outcome = self.process_file(&fp, force).await;
                let n = self.live.advance();
                self.reporter
                    .report(SyncProgressEvent::Processing { n, total });
                outcome
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                FileOutcome::Indexed { chunks, duplicate } => {
                    report.indexed += 1;
                    report.chunks_written += chunks as u64;
                    if duplicate {
                        report.duplicates += 1;
                    }
                }
                FileOutcome::Unchanged => report.skipped += 1,
                FileOutcome::Failed(failure) => report.record_failure(failure),
                FileOutcome::Cancelled => report.cancelled = true,
            }
        }
        self.prune_path_locks().await;

        if report.cancelled {
            info!(indexed = report.indexed, "sync cancelled");
        } else {
            // Tombstone removed files
            self.live
                .begin(SyncPhase::Finalizing, diff.removed.len() as u64);
            let now = now_ts();
            for path in &diff.removed {
                let _guard = self.lock_path(path).await;
                self.store.mark_deleted(path, now).await?;
                report.deleted += 1;
            }

            if let Some(mut manifest) = self.store.manifest().await? {
                manifest.last_full_scan = Some(now);
                if manifest.reembed_pending {
                    manifest.reembed_pending = self.has_stale_records(&manifest.model_id).await?;
                    if !manifest.reembed_pending {
                        info!(model = %manifest.model_id, "re-embed complete");
                    }
                }
                self.store.set_manifest(&manifest).await?;
            }
        }

        report.failures.sort_by(|a, b| a.path.cmp(&b.path));
        report.elapsed = started.elapsed();
        self.reporter.report(SyncProgressEvent::Finished {
            indexed: report.indexed,
            failed: report.failed,
        });
        info!(
            indexed = report.indexed,
            failed = report.failed,
            skipped = report.skipped,
            deleted = report.deleted,
            chunks = report.chunks_written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sync finished"
        );
        Ok(report)
    }

    /// Make sure the manifest matches the configured model. Returns `true`
    /// when every file has to be re-embedded.
    async fn check_manifest(&self, options: SyncOptions) -> Result<bool> {
        let model_id = self.embedder.model_id();
        let dims = self.embedder.dims();
        if dims == 0 {
            return Err(IndexError::Configuration(
                "embedding provider is disabled; set [embedding] provider to index files"
                    .to_string(),
            ));
        }

        match self.store.manifest().await? {
            None => {
                if !options.dry_run {
                    self.store.set_manifest(&Manifest::new(model_id, dims)).await?;
                }
                Ok(options.reembed)
            }
            Some(manifest) if manifest.schema_version != SCHEMA_VERSION => {
                Err(IndexError::Configuration(format!(
                    "index schema version {} is not supported (expected {}); rebuild the index",
                    manifest.schema_version, SCHEMA_VERSION
                )))
            }
            Some(manifest) if manifest.model_id != model_id || manifest.dims != dims => {
                if !options.reembed {
                    return Err(IndexError::Configuration(format!(
                        "index was built with model '{}' ({} dims) but '{}' ({} dims) is configured; \
                         run sync with --reembed to rebuild it",
                        manifest.model_id, manifest.dims, model_id, dims
                    )));
                }
                if !options.dry_run {
                    let mut next = Manifest::new(model_id, dims);
                    next.last_full_scan = manifest.last_full_scan;
                    next.reembed_pending = true;
                    self.store.set_manifest(&next).await?;
                }
                info!(from = %manifest.model_id, to = %model_id, "re-embedding index under new model");
                Ok(true)
            }
            Some(_) => Ok(options.reembed),
        }
    }

    /// Fingerprint candidates in parallel. Unreadable paths are returned
    /// separately with their error message.
    async fn fingerprint_all(
        &self,
        candidates: Vec<PathBuf>,
    ) -> (Vec<Fingerprint>, HashMap<String, String>) {
        let results: Vec<(PathBuf, std::io::Result<Fingerprint>)> = stream::iter(candidates)
            .map(|path| async move {
                let result = fingerprint_file(&path).await;
                self.live.advance();
                (path, result)
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut observed = Vec::with_capacity(results.len());
        let mut unreadable = HashMap::new();
        for (path, result) in results {
            match result {
                Ok(fp) => observed.push(fp),
                Err(e) => {
                    unreadable.insert(path.to_string_lossy().to_string(), e.to_string());
                }
            }
        }
        observed.sort_by(|a, b| a.path.cmp(&b.path));
        (observed, unreadable)
    }

    /// Put files that could not be read on record as `Io` failures. A file
    /// that is still indexed keeps its last good version.
    async fn record_unreadable(&self, unreadable: &HashMap<String, String>, stored: &[FileRecord]) {
        if unreadable.is_empty() {
            return;
        }
        let by_path: HashMap<&str, &FileRecord> =
            stored.iter().map(|r| (r.path.as_str(), r)).collect();
        for (path, message) in unreadable {
            let previous = by_path.get(path.as_str()).copied();
            if previous.is_some_and(|r| r.status == FileStatus::Indexed) {
                continue;
            }
            let failure = Failure::new(FailureKind::Io, message.clone());
            if previous.is_some_and(|r| r.failure.as_ref() == Some(&failure)) {
                continue;
            }
            let fp = match previous {
                Some(r) => Fingerprint {
                    path: path.clone(),
                    hash: r.hash.clone(),
                    size: r.size,
                    mtime: r.mtime,
                },
                None => Fingerprint {
                    path: path.clone(),
                    hash: String::new(),
                    size: 0,
                    mtime: 0,
                },
            };
            let _guard = self.lock_path(path).await;
            let record = FileRecord::failed(&fp, None, failure);
            if let Err(e) = self.store.upsert_file(&record, &[]).await {
                warn!(path = %path, error = %e, "could not record failure");
            }
        }
    }

    async fn has_stale_records(&self, model_id: &str) -> Result<bool> {
        let filter = FileFilter {
            roots: Vec::new(),
            status: Some(FileStatus::Indexed),
        };
        let indexed = self.store.list_files(&filter).await?;
        Ok(indexed.iter().any(|r| r.is_stale(model_id)))
    }

    async fn lock_path(&self, path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.path_locks.lock().await;
            Arc::clone(locks.entry(path.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    async fn prune_path_locks(&self) {
        let mut locks = self.path_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Classify, extract, chunk, embed and write one file version.
    async fn process_file(&self, fp: &Fingerprint, force: bool) -> FileOutcome {
        let _guard = self.lock_path(&fp.path).await;
        // The plan was made before the lock; another pass may have committed this version.
        if !force && self.already_current(fp).await {
            debug!(path = %fp.path, "already indexed by a concurrent pass");
            return FileOutcome::Unchanged;
        }
        let mut media_type = None;

        let failure = match self.prepare(fp, &mut media_type).await {
            Ok(chunks) => {
                let media = media_type.as_deref().unwrap_or_default();
                let record = FileRecord::indexed(fp, media, self.embedder.model_id(), now_ts());
                let duplicate = self.has_duplicate(fp).await;
                match self.store.upsert_file(&record, &chunks).await {
                    Ok(()) => {
                        debug!(path = %fp.path, chunks = chunks.len(), "indexed");
                        return FileOutcome::Indexed {
                            chunks: chunks.len(),
                            duplicate,
                        };
                    }
                    Err(e) => Failure::new(FailureKind::Storage, e.to_string()),
                }
            }
            Err(failure) => failure,
        };

        warn!(path = %fp.path, kind = %failure.kind, error = %failure.message, "file failed");
        let record = FileRecord::failed(fp, media_type, failure.clone());
        if let Err(e) = self.store.upsert_file(&record, &[]).await {
            warn!(path = %fp.path, error = %e, "could not record failure");
        }
        FileOutcome::Failed(FileFailure {
            path: fp.path.clone(),
            kind: failure.kind,
            message: failure.message,
        })
    }

    async fn prepare(
        &self,
        fp: &Fingerprint,
        media_type: &mut Option<String>,
    ) -> std::result::Result<Vec<ChunkRecord>, Failure> {
        let path = Path::new(&fp.path);
        let limit = self.settings.extract_timeout;

        let head = with_timeout(limit, read_head(path))
            .await?
            .map_err(|e| Failure::new(FailureKind::Io, e.to_string()))?;

        let media = match with_timeout(limit, self.classifier.classify(&head, path)).await? {
            Classification::Known(media) => media,
            Classification::Unknown => {
                return Err(Failure::new(
                    FailureKind::UnsupportedFormat,
                    "unrecognized file type",
                ))
            }
        };
        *media_type = Some(media.clone());

        let text = with_timeout(limit, self.extractor.extract(path, &media))
            .await?
            .map_err(|e| Failure::new(e.kind(), e.to_string()))?;

        let chunks = self.chunker.chunk(&text);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_texts(&texts).await?;

        let model_id = self.embedder.model_id().to_string();
        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| ChunkRecord {
                file_path: fp.path.clone(),
                seq: chunk.seq,
                text: chunk.text,
                span: chunk.span,
                vector,
                model_id: model_id.clone(),
            })
            .collect())
    }

    async fn already_current(&self, fp: &Fingerprint) -> bool {
        match self.store.get_file(&fp.path).await {
            Ok(Some(record)) => {
                record.status == FileStatus::Indexed
                    && record.hash == fp.hash
                    && record.size == fp.size
                    && !record.is_stale(self.embedder.model_id())
            }
            _ => false,
        }
    }

    async fn has_duplicate(&self, fp: &Fingerprint) -> bool {
        match self.store.files_with_hash(&fp.hash).await {
            Ok(records) => {
                let other = records.iter().find(|r| r.path != fp.path);
                if let Some(other) = other {
                    debug!(path = %fp.path, same_as = %other.path, "duplicate content");
                }
                other.is_some()
            }
            Err(e) => {
                warn!(path = %fp.path, error = %e, "duplicate lookup failed");
                false
            }
        }
    }

    /// One vector per text, in order. Any failing text fails the whole file.
    async fn embed_texts(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, Failure> {
        let batch_size = self
            .settings
            .batch_size
            .min(self.embedder.max_batch_size())
            .max(1);
        let dims = self.embedder.dims();

        let mut vectors = Vec::with_capacity(texts.len());
        let mut first_error: Option<(usize, EmbedError)> = None;
        let mut failed = 0usize;

        for (b, batch) in texts.chunks(batch_size).enumerate() {
            let start = b * batch_size;
            let items = self.embed_batch(batch).await.map_err(|e| {
                Failure::new(e.failure_kind(), format!("batch at chunk {}: {}", start, e))
            })?;
            for (i, item) in items.into_iter().enumerate() {
                let seq = start + i;
                let item = item.and_then(|v| {
                    if v.len() == dims {
                        Ok(v)
                    } else {
                        Err(EmbedError::DimensionMismatch {
                            expected: dims,
                            got: v.len(),
                        })
                    }
                });
                match item {
                    Ok(v) => vectors.push(v),
                    Err(e) => {
                        failed += 1;
                        if first_error.is_none() {
                            first_error = Some((seq, e));
                        }
                    }
                }
            }
        }

        match first_error {
            None => Ok(vectors),
            Some((seq, e)) => {
                let mut message = format!("chunk {}: {}", seq, e);
                if failed > 1 {
                    message.push_str(&format!(" ({} of {} chunks failed)", failed, texts.len()));
                }
                Err(Failure::new(e.failure_kind(), message))
            }
        }
    }

    /// Embed one batch. A batch the provider rejects is retried once as two
    /// halves; a half rejected again is embedded chunk by chunk so the failure
    /// lands on the chunks that caused it. Transient errors and timeouts have
    /// already been retried and fail the whole batch.
    async fn embed_batch(&self, texts: &[String]) -> EmbedBatchResult {
        match self.call_provider(texts).await {
            Ok(items) => return Ok(items),
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) if texts.len() == 1 => return Ok(vec![Err(e)]),
            Err(e) => debug!(size = texts.len(), error = %e, "batch rejected, splitting"),
        }

        let (left, right) = texts.split_at(texts.len() / 2);
        let mut items = Vec::with_capacity(texts.len());
        for half in [left, right] {
            match self.call_provider(half).await {
                Ok(half_items) => items.extend(half_items),
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) if half.len() == 1 => items.push(Err(e)),
                Err(_) => {
                    for text in half {
                        match self.call_provider(std::slice::from_ref(text)).await {
                            Ok(mut one) => items.push(one.pop().unwrap_or_else(|| {
                                Err(EmbedError::Rejected("empty provider response".into()))
                            })),
                            Err(e) if e.is_retryable() => return Err(e),
                            Err(e) => items.push(Err(e)),
                        }
                    }
                }
            }
        }
        Ok(items)
    }

    async fn call_provider(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<std::result::Result<Vec<f32>, EmbedError>>, EmbedError> {
        let _permit = self
            .embed_permits
            .acquire()
            .await
            .map_err(|_| EmbedError::Transient("embedding pool closed".to_string()))?;
        let batch = embed_with_retry(self.embedder.as_ref(), texts, &self.settings.retry).await?;
        Ok(batch.items)
    }
}

type EmbedBatchResult = std::result::Result<Vec<std::result::Result<Vec<f32>, EmbedError>>, EmbedError>;

async fn with_timeout<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = T>,
) -> std::result::Result<T, Failure> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        Failure::new(
            FailureKind::Timeout,
            format!("timed out after {:?}", limit),
        )
    })
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
