//! TOML configuration for sift.
//!
//! Every section carries serde defaults, so a config file only needs the
//! `[db]` table. [`load_config`] parses and validates in one step; the
//! pipeline and query engine assume a validated [`Config`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Metric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Roots scanned when `sync` is given no explicit paths.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
    #[serde(default = "default_deleted_grace_secs")]
    pub deleted_grace_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            include_hidden: false,
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
            concurrency: default_concurrency(),
            extract_timeout_secs: default_extract_timeout_secs(),
            deleted_grace_secs: default_deleted_grace_secs(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_concurrency() -> usize {
    4
}
fn default_extract_timeout_secs() -> u64 {
    60
}
fn default_deleted_grace_secs() -> u64 {
    7 * 24 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Fraction of the budget repeated at the start of the next chunk.
    #[serde(default = "default_overlap")]
    pub overlap: f64,
    /// Fraction of the budget searched backwards for a natural boundary.
    #[serde(default = "default_boundary_window")]
    pub boundary_window: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap: default_overlap(),
            boundary_window: default_boundary_window(),
        }
    }
}

fn default_max_tokens() -> usize {
    256
}
fn default_overlap() -> f64 {
    0.1
}
fn default_boundary_window() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Base URL for HTTP providers that run locally (ollama).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_concurrent_requests() -> usize {
    2
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default)]
    pub dedupe_by_file: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            metric: default_metric(),
            dedupe_by_file: false,
        }
    }
}

fn default_k() -> usize {
    10
}
fn default_metric() -> String {
    "cosine".to_string()
}

impl RetrievalConfig {
    /// The configured metric. Only valid after [`load_config`] validation;
    /// unknown names fall back to cosine.
    pub fn metric(&self) -> Metric {
        Metric::parse(&self.metric).unwrap_or(Metric::Cosine)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate a config held in memory.
pub fn parse_config(src: &str) -> Result<Config> {
    let config: Config = toml::from_str(src).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        // Chunking
        if self.chunking.max_tokens == 0 {
            anyhow::bail!("chunking.max_tokens must be > 0");
        }
        if !(0.0..=0.5).contains(&self.chunking.overlap) {
            anyhow::bail!("chunking.overlap must be in [0.0, 0.5]");
        }
        if !(0.0..=1.0).contains(&self.chunking.boundary_window) {
            anyhow::bail!("chunking.boundary_window must be in [0.0, 1.0]");
        }

        // Index
        if self.index.concurrency == 0 {
            anyhow::bail!("index.concurrency must be >= 1");
        }
        if self.index.extract_timeout_secs == 0 {
            anyhow::bail!("index.extract_timeout_secs must be > 0");
        }

        // Retrieval
        if self.retrieval.default_k == 0 {
            anyhow::bail!("retrieval.default_k must be >= 1");
        }
        if Metric::parse(&self.retrieval.metric).is_none() {
            anyhow::bail!(
                "Unknown retrieval metric: '{}'. Must be cosine, dot, or euclidean.",
                self.retrieval.metric
            );
        }

        // Embedding
        let emb = &self.embedding;
        if emb.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }
        if emb.max_concurrent_requests == 0 {
            anyhow::bail!("embedding.max_concurrent_requests must be >= 1");
        }
        if emb.timeout_secs == 0 {
            anyhow::bail!("embedding.timeout_secs must be > 0");
        }

        match emb.provider.as_str() {
            "disabled" | "hash" | "openai" | "ollama" | "local" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
                other
            ),
        }

        if emb.is_enabled() {
            if emb.dims.is_none() || emb.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    emb.provider
                );
            }
            // The hash provider derives its model id from dims.
            if emb.model.is_none() && emb.provider != "hash" {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    emb.provider
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        parse_config(toml_src)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse("[db]\npath = \"./data/sift.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_tokens, 256);
        assert_eq!(config.index.include_globs, vec!["**/*".to_string()]);
        assert!(!config.index.include_hidden);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.retrieval.metric(), Metric::Cosine);
    }

    #[test]
    fn rejects_out_of_range_overlap() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\noverlap = 0.75\n").unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn rejects_unknown_provider_and_metric() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nmetric = \"manhattan\"\n").is_err());
    }

    #[test]
    fn enabled_provider_requires_model_and_dims() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\ndims = 8\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\ndims = 64\n").is_ok());
    }
}
