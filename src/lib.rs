//! # sift
//!
//! Local-first incremental semantic indexing for file trees.
//!
//! sift discovers files under a set of roots, extracts their text, splits it
//! into bounded chunks, embeds each chunk and persists everything in SQLite so
//! that a natural-language query returns the most relevant chunks and their
//! source files. Re-running a sync only touches files whose content changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ walk +     │──▶│ diff against  │──▶│ classify → extract →     │──▶│  SQLite  │
//! │ fingerprint│   │ stored records│   │ chunk → embed (batched)  │   │ files +  │
//! └────────────┘   └───────────────┘   └──────────────────────────┘   │ chunks   │
//!                                                                     └────┬─────┘
//!                          query ──▶ embed ──▶ nearest chunks ◀────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sift init                         # create database
//! sift sync ./docs                  # index (incrementally) a directory
//! sift search "how do refunds work" -k 5
//! sift status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Failure kinds and error types |
//! | [`models`] | File, chunk and manifest records; filters and hits |
//! | [`walk`] | File discovery under roots |
//! | [`fingerprint`] | Content hashing and snapshot diffing |
//! | [`classify`] | Media type detection |
//! | [`extract`] | Text extraction (plain text, PDF, DOCX, PPTX, XLSX) |
//! | [`chunk`] | Text chunking under a token budget |
//! | [`embedding`] | Embedding providers, retry and vector math |
//! | [`store`] | Index storage trait with SQLite and in-memory backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`pipeline`] | The incremental sync pass |
//! | [`query`] | Semantic query engine |
//! | [`progress`] | Sync progress reporting |
//! | [`status`] | Index status overview |

pub mod chunk;
pub mod classify;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod status;
pub mod store;
pub mod walk;

pub use error::{FailureKind, IndexError, StoreError};
pub use pipeline::{IndexingPipeline, SyncOptions, SyncReport};
pub use query::{QueryEngine, QueryFilters, QueryHit};
pub use store::{IndexStore, InMemoryStore, SqliteStore};
