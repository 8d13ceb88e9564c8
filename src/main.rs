//! # sift CLI (`sift`)
//!
//! The `sift` binary drives the library: it creates the index database,
//! runs incremental sync passes and answers semantic queries.
//!
//! ## Usage
//!
//! ```bash
//! sift --config ./config/sift.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sift init` | Create the SQLite database and run schema migrations |
//! | `sift sync [PATHS..]` | Index new and changed files, tombstone removed ones |
//! | `sift search "<query>"` | Ranked chunks most similar to the query |
//! | `sift status` | File counts, model, last scan |
//! | `sift files` | File records with their status and failure reason |
//! | `sift prune` | Purge tombstoned records past the grace period |
//! | `sift rm <path>` | Drop one file from the index |
//!
//! Reports go to stdout; logs and progress go to stderr. Set `SIFT_LOG`
//! (e.g. `SIFT_LOG=sift_index=debug`) or pass `-v` / `-vv` for more detail.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sift_index::config::{self, Config};
use sift_index::embedding::{create_client, RetryPolicy};
use sift_index::models::{FileFilter, FileStatus};
use sift_index::progress::ProgressMode;
use sift_index::status;
use sift_index::{IndexStore, IndexingPipeline, QueryEngine, QueryFilters, SqliteStore, SyncOptions, SyncReport};

/// sift: local-first incremental semantic indexing for file trees.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sift.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sift",
    about = "sift: local-first incremental semantic indexing for file trees",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sift.toml")]
    config: PathBuf,

    /// More log output on stderr (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and its tables. Idempotent.
    Init,

    /// Run one incremental indexing pass.
    ///
    /// Only new and changed files are extracted and embedded; files gone
    /// from disk are tombstoned. Ctrl-C stops the pass between files.
    Sync {
        /// Roots to index. Defaults to `[index] roots` from the config.
        paths: Vec<PathBuf>,

        /// Reprocess every file, changed or not.
        #[arg(long)]
        force: bool,

        /// Also retry files that failed with a permanent reason.
        #[arg(long)]
        retry_failed: bool,

        /// Rebuild the index under the configured embedding model.
        #[arg(long)]
        reembed: bool,

        /// Show what would change without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr: `off`, `human` or `json`. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search indexed files by meaning.
    Search {
        /// The query text.
        query: String,

        /// Number of results. Defaults to `[retrieval] default_k`.
        #[arg(short, long)]
        k: Option<usize>,

        /// Only files at or below this path.
        #[arg(long)]
        path_prefix: Option<String>,

        /// Only files of this media type (e.g. `application/pdf`).
        #[arg(long = "type")]
        media_type: Option<String>,

        /// Only files modified on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only files indexed on or after this date (YYYY-MM-DD).
        #[arg(long)]
        indexed_since: Option<String>,

        /// Keep only the best chunk per file.
        #[arg(long)]
        by_file: bool,

        /// Print hits as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index counts, model and last scan.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// List file records.
    Files {
        /// Only records with this status: pending, indexed, failed or deleted.
        #[arg(long)]
        status: Option<String>,

        /// Only records at or below this path.
        #[arg(long)]
        path_prefix: Option<String>,
    },

    /// Purge tombstoned records.
    Prune {
        /// Purge records deleted more than N days ago. Defaults to
        /// `[index] deleted_grace_secs`.
        #[arg(long)]
        older_than_days: Option<u64>,
    },

    /// Remove one file's record and chunks from the index.
    Rm {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = open_store(&cfg).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            paths,
            force,
            retry_failed,
            reembed,
            dry_run,
            progress,
        } => {
            let options = SyncOptions {
                force,
                retry_failed,
                reembed,
                dry_run,
            };
            run_sync(&cfg, paths, options, progress.as_deref()).await?;
        }
        Commands::Search {
            query,
            k,
            path_prefix,
            media_type,
            since,
            indexed_since,
            by_file,
            json,
        } => {
            let filters = QueryFilters {
                path_prefix: path_prefix.map(|p| canonical_or_raw(Path::new(&p))),
                media_type,
                indexed_after: since_ts(indexed_since.as_deref())?,
                modified_after: since_ts(since.as_deref())?,
            };
            let k = k.unwrap_or(cfg.retrieval.default_k);
            run_search(&cfg, &query, k, &filters, by_file, json).await?;
        }
        Commands::Status { json } => {
            let store = open_store(&cfg).await?;
            let st = status::status(&store, None).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&st)?);
            } else {
                print!("{}", st.render(chrono::Utc::now().timestamp()));
            }
            store.close().await;
        }
        Commands::Files {
            status,
            path_prefix,
        } => {
            let status = match status {
                Some(s) => Some(FileStatus::parse(&s).with_context(|| {
                    format!(
                        "Unknown status: '{}'. Use pending, indexed, failed, or deleted.",
                        s
                    )
                })?),
                None => None,
            };
            let filter = FileFilter {
                roots: path_prefix
                    .map(|p| vec![canonical_or_raw(Path::new(&p))])
                    .unwrap_or_default(),
                status,
            };
            let store = open_store(&cfg).await?;
            let records = store.list_files(&filter).await?;
            if records.is_empty() {
                println!("No files.");
            }
            for record in &records {
                match &record.failure {
                    Some(failure) => println!("{:<8} {}  {}", record.status.as_str(), record.path, failure),
                    None => println!(
                        "{:<8} {}  {}",
                        record.status.as_str(),
                        record.path,
                        record.media_type.as_deref().unwrap_or("-")
                    ),
                }
            }
            store.close().await;
        }
        Commands::Prune { older_than_days } => {
            let grace = older_than_days
                .map(|d| d * 86_400)
                .unwrap_or(cfg.index.deleted_grace_secs);
            let horizon = chrono::Utc::now().timestamp() - grace as i64;
            let store = open_store(&cfg).await?;
            let purged = store.gc_deleted(horizon).await?;
            println!("pruned: {}", purged);
            store.close().await;
        }
        Commands::Rm { path } => {
            let path = canonical_or_raw(&path);
            let store = open_store(&cfg).await?;
            if store.delete_file(&path).await? {
                println!("removed: {}", path);
            } else {
                println!("not indexed: {}", path);
            }
            store.close().await;
        }
    }

    Ok(())
}

/// Logs go to stderr. `-v` flags win over `SIFT_LOG`; default level is warn.
fn init_logging(verbose: u8) -> Result<()> {
    let filter = match verbose {
        0 => EnvFilter::try_from_env("SIFT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}

async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&cfg.db.path)
        .await
        .with_context(|| format!("Failed to open index at {}", cfg.db.path.display()))
}

async fn run_sync(
    cfg: &Config,
    paths: Vec<PathBuf>,
    options: SyncOptions,
    progress: Option<&str>,
) -> Result<()> {
    let roots = if paths.is_empty() {
        cfg.index.roots.clone()
    } else {
        paths
    };
    if roots.is_empty() {
        bail!("No paths given and [index] roots is empty.");
    }

    let mode = match progress {
        Some(s) => ProgressMode::parse(s)
            .with_context(|| format!("Unknown progress mode: '{}'. Use off, human, or json.", s))?,
        None => ProgressMode::default_for_tty(),
    };

    let store = Arc::new(open_store(cfg).await?);
    let embedder = create_client(&cfg.embedding)?;
    let pipeline =
        IndexingPipeline::new(cfg, store.clone(), embedder)?.with_reporter(mode.reporter());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("sync  cancelling after files in flight...");
            on_signal.cancel();
        }
    });

    let report = pipeline.sync(&roots, options, &cancel).await?;
    print_report(&report);
    store.close().await;
    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.dry_run {
        println!("sync (dry-run)");
        println!("  to index: {}", report.indexed);
        println!("  unchanged: {}", report.skipped);
        println!("  to delete: {}", report.deleted);
        println!("  unreadable: {}", report.failed);
        return;
    }

    println!("sync");
    println!("  indexed: {}", report.indexed);
    println!("  failed: {}", report.failed);
    println!("  skipped: {}", report.skipped);
    println!("  deleted: {}", report.deleted);
    println!("  touched: {}", report.touched);
    println!("  chunks written: {}", report.chunks_written);
    if report.duplicates > 0 {
        println!("  duplicate content: {}", report.duplicates);
    }
    if !report.failures.is_empty() {
        println!("  failures:");
        for failure in &report.failures {
            println!("    {}  {}: {}", failure.path, failure.kind, failure.message);
        }
    }
    println!("  elapsed: {} ms", report.elapsed.as_millis());
    if report.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
}

async fn run_search(
    cfg: &Config,
    query: &str,
    k: usize,
    filters: &QueryFilters,
    by_file: bool,
    json: bool,
) -> Result<()> {
    let store = Arc::new(open_store(cfg).await?);
    let embedder = create_client(&cfg.embedding)?;
    let engine = QueryEngine::new(
        store.clone(),
        embedder,
        &cfg.retrieval,
        RetryPolicy::from_config(&cfg.embedding),
    )
    .dedupe_by_file(by_file || cfg.retrieval.dedupe_by_file);

    let hits = engine.query(query, k, filters).await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] {}  (chunk {}, bytes {}..{})",
            i + 1,
            hit.score,
            hit.file_path,
            hit.seq,
            hit.span.start,
            hit.span.end
        );
        println!("    {}", snippet(&hit.chunk_text, 200));
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

fn since_ts(date: Option<&str>) -> Result<Option<i64>> {
    let Some(date) = date else {
        return Ok(None);
    };
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", date))?;
    let ts = day
        .and_hms_opt(0, 0, 0)
        .context("Invalid date")?
        .and_utc()
        .timestamp();
    Ok(Some(ts))
}

/// Stored paths are canonical; resolve user input the same way when it exists.
fn canonical_or_raw(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}
