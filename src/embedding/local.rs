//! Local inference via fastembed.
//!
//! The model is downloaded from Hugging Face on first use and cached; after
//! that embeddings run fully offline. The loaded model is kept for the life
//! of the client and inference runs on the blocking pool.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{BatchEmbedding, EmbedError, EmbeddingClient};
use crate::config::EmbeddingConfig;

const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

pub struct LocalClient {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: fastembed::EmbeddingModel,
    loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let (model, native_dims) = resolve_model(&model_name)?;
        let dims = config.dims.unwrap_or(native_dims);
        if dims != native_dims {
            return Err(EmbedError::Config(format!(
                "model {} produces {}-dimensional vectors, config says {}",
                model_name, native_dims, dims
            )));
        }

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize), EmbedError> {
    use fastembed::EmbeddingModel as M;
    Ok(match name {
        "all-minilm-l6-v2" => (M::AllMiniLML6V2, 384),
        "bge-small-en-v1.5" => (M::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (M::BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (M::BGELargeENV15, 1024),
        "nomic-embed-text-v1" => (M::NomicEmbedTextV1, 768),
        "nomic-embed-text-v1.5" => (M::NomicEmbedTextV15, 768),
        "multilingual-e5-small" => (M::MultilingualE5Small, 384),
        "multilingual-e5-base" => (M::MultilingualE5Base, 768),
        "multilingual-e5-large" => (M::MultilingualE5Large, 1024),
        other => {
            return Err(EmbedError::Config(format!(
                "unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1, nomic-embed-text-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            )))
        }
    })
}

#[async_trait]
impl EmbeddingClient for LocalClient {
    fn model_id(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<BatchEmbedding, EmbedError> {
        let loaded = Arc::clone(&self.loaded);
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| EmbedError::Config("local model lock poisoned".into()))?;
            if guard.is_none() {
                tracing::info!(?model, "loading local embedding model");
                let options = fastembed::InitOptions::new(model).with_show_download_progress(true);
                let instance = fastembed::TextEmbedding::try_new(options).map_err(|e| {
                    EmbedError::Config(format!("failed to initialize local embedding model: {}", e))
                })?;
                *guard = Some(instance);
            }
            let Some(instance) = guard.as_mut() else {
                return Err(EmbedError::Config("local model not loaded".into()));
            };
            instance
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbedError::Rejected(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| EmbedError::Transient(format!("local embedding task failed: {}", e)))??;

        Ok(BatchEmbedding::all_ok(vectors))
    }
}
