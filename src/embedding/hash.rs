//! Offline feature-hashing embedder.
//!
//! Each lowercased alphanumeric token is hashed (FNV-1a) into one of `dims`
//! buckets with a hash-derived sign, and the result is L2-normalized. Texts
//! sharing vocabulary land close together under cosine similarity. No model,
//! no network, identical output on every platform.

use async_trait::async_trait;

use super::{BatchEmbedding, EmbedError, EmbeddingClient};
use crate::config::EmbeddingConfig;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub struct HashEmbedder {
    model_id: String,
    dims: usize,
    batch_size: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            model_id: format!("hash-{}", dims),
            dims,
            batch_size: 64,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let dims = config
            .dims
            .filter(|&d| d > 0)
            .ok_or_else(|| EmbedError::Config("embedding.dims required for hash provider".into()))?;
        let mut embedder = Self::new(dims);
        if let Some(model) = &config.model {
            embedder.model_id = model.clone();
        }
        embedder.batch_size = config.batch_size;
        Ok(embedder)
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for token in tokens(text) {
            let h = fnv1a(token.as_bytes());
            let idx = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vec[idx] += sign;
        }

        let mag: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if mag > 0.0 {
            for v in &mut vec {
                *v /= mag;
            }
        }
        vec
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |h, &b| {
        (h ^ b as u64).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }
    async fn embed(&self, texts: &[String]) -> Result<BatchEmbedding, EmbedError> {
        Ok(BatchEmbedding::all_ok(
            texts.iter().map(|t| self.embed_one(t)).collect(),
        ))
    }
}
