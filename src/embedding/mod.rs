//! Embedding client abstraction and implementations.
//!
//! Defines the [`EmbeddingClient`] trait and concrete implementations:
//! - **[`DisabledClient`]**: returns errors; used when embeddings are not configured.
//! - **[`HashEmbedder`]**: deterministic feature-hashed bag-of-words vectors, fully offline.
//! - **[`OpenAIClient`]**: calls the OpenAI embeddings API.
//! - **[`OllamaClient`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalClient`**: runs models locally via fastembed (feature `local-embeddings`).
//!
//! A client is bound to one model: its [`model_id`](EmbeddingClient::model_id)
//! is what the index manifest records and what every stored vector is tagged with.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`], [`dot_product`], [`euclidean_distance`]
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding for SQLite
//!
//! # Retry Strategy
//!
//! Clients make a single attempt per [`embed`](EmbeddingClient::embed) call and
//! classify the outcome. [`embed_with_retry`] wraps a call with a timeout and
//! exponential backoff:
//! - HTTP 429 (rate limited), 5xx and network errors → [`EmbedError::Transient`], retried
//! - timeouts → [`EmbedError::Timeout`], retried
//! - other 4xx → [`EmbedError::Rejected`], returned immediately
//! - Backoff: base, 2×base, 4×base, ... (capped at 2^5 × base)

mod hash;
mod http;
#[cfg(feature = "local-embeddings")]
mod local;

pub use hash::HashEmbedder;
pub use http::{OllamaClient, OpenAIClient};
#[cfg(feature = "local-embeddings")]
pub use local::LocalClient;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;
use crate::error::FailureKind;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbedError {
    /// Rate limiting, server errors, dropped connections.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider refused the input; retrying the same request will not help.
    #[error("provider rejected input: {0}")]
    Rejected(String),

    #[error("expected {expected}-dimensional vector, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding provider misconfigured: {0}")]
    Config(String),
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::Transient(_) | EmbedError::Timeout(_))
    }

    /// How this error is recorded on a failed file.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            EmbedError::Transient(_) => FailureKind::Transient,
            EmbedError::Timeout(_) => FailureKind::Timeout,
            EmbedError::Rejected(_)
            | EmbedError::DimensionMismatch { .. }
            | EmbedError::Disabled
            | EmbedError::Config(_) => FailureKind::Rejected,
        }
    }
}

/// Result of one provider call: one entry per input, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEmbedding {
    pub items: Vec<Result<Vec<f32>, EmbedError>>,
}

impl BatchEmbedding {
    pub fn all_ok(vectors: Vec<Vec<f32>>) -> Self {
        Self {
            items: vectors.into_iter().map(Ok).collect(),
        }
    }
}

/// A provider of fixed-dimension text embeddings.
///
/// `embed` returns `Err` when the whole call failed, and `Ok` with per-item
/// results when individual inputs failed. Implementations must return exactly
/// one item per input.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Identifier of the model producing the vectors (e.g. `"text-embedding-3-small"`).
    fn model_id(&self) -> &str;
    fn dims(&self) -> usize;
    /// Largest batch the provider accepts in one call.
    fn max_batch_size(&self) -> usize {
        64
    }
    async fn embed(&self, texts: &[String]) -> Result<BatchEmbedding, EmbedError>;
}

// ============ Disabled Client ============

/// Used when `embedding.provider = "disabled"`. Every call fails.
pub struct DisabledClient;

#[async_trait]
impl EmbeddingClient for DisabledClient {
    fn model_id(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<BatchEmbedding, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

/// Create the appropriate [`EmbeddingClient`] based on configuration.
///
/// | Config Value | Client |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledClient`] |
/// | `"hash"` | [`HashEmbedder`] |
/// | `"openai"` | [`OpenAIClient`] |
/// | `"ollama"` | [`OllamaClient`] |
/// | `"local"` | `LocalClient` (feature `local-embeddings`) |
pub fn create_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>, EmbedError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClient)),
        "hash" => Ok(Arc::new(HashEmbedder::from_config(config)?)),
        "openai" => Ok(Arc::new(OpenAIClient::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaClient::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalClient::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(EmbedError::Config(
            "local embedding provider requires --features local-embeddings".to_string(),
        )),
        other => Err(EmbedError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Timeout and backoff applied around each provider call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.min(5))
    }
}

/// Call `client.embed` with a per-call timeout, retrying transient failures
/// and timeouts with exponential backoff. The returned batch always has one
/// item per input.
pub async fn embed_with_retry(
    client: &dyn EmbeddingClient,
    texts: &[String],
    policy: &RetryPolicy,
) -> Result<BatchEmbedding, EmbedError> {
    let mut attempt = 0u32;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, client.embed(texts)).await {
            Ok(result) => result,
            Err(_) => Err(EmbedError::Timeout(policy.timeout)),
        };

        match outcome {
            Ok(batch) if batch.items.len() == texts.len() => return Ok(batch),
            Ok(batch) => {
                return Err(EmbedError::Rejected(format!(
                    "provider returned {} results for {} inputs",
                    batch.items.len(),
                    texts.len()
                )))
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                tracing::debug!(attempt, ?delay, error = %e, "retrying embedding call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty, zero or
/// mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean distance; `f32::INFINITY` for mismatched lengths.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
