//! HTTP embedding providers: OpenAI and Ollama.
//!
//! Both make one request per [`embed`](EmbeddingClient::embed) call and map
//! the outcome onto [`EmbedError`]; backoff lives in
//! [`embed_with_retry`](super::embed_with_retry).

use async_trait::async_trait;
use std::time::Duration;

use super::{BatchEmbedding, EmbedError, EmbeddingClient};
use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

fn build_http(config: &EmbeddingConfig) -> Result<reqwest::Client, EmbedError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| EmbedError::Config(format!("failed to build HTTP client: {}", e)))
}

fn required<T: Clone>(value: &Option<T>, field: &str, provider: &str) -> Result<T, EmbedError> {
    value
        .clone()
        .ok_or_else(|| EmbedError::Config(format!("embedding.{} required for {} provider", field, provider)))
}

/// Send a JSON body and classify the response.
///
/// 429 and 5xx are transient, other non-success statuses are rejections,
/// and transport failures (connect, reset, client-side timeout) are transient.
async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
    provider: &str,
) -> Result<serde_json::Value, EmbedError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| EmbedError::Transient(format!("{} connection error: {}", provider, e)))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| EmbedError::Transient(format!("{} response body: {}", provider, e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", provider, status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(EmbedError::Transient(message))
    } else {
        Err(EmbedError::Rejected(message))
    }
}

fn parse_vector(value: &serde_json::Value, provider: &str) -> Result<Vec<f32>, EmbedError> {
    value
        .as_array()
        .ok_or_else(|| EmbedError::Rejected(format!("invalid {} response: embedding is not an array", provider)))
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

// ============ OpenAI ============

/// Calls `POST /v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAIClient {
    model: String,
    dims: usize,
    batch_size: usize,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = required(&config.model, "model", "OpenAI")?;
        let dims = required(&config.dims, "dims", "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EmbedError::Config("OPENAI_API_KEY environment variable not set".into()))?;

        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size,
            api_key,
            http: build_http(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIClient {
    fn model_id(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<BatchEmbedding, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .http
            .post(OPENAI_URL)
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_json(request, &body, "OpenAI").await?;
        parse_openai_response(&json, texts.len())
    }
}

/// Extract `data[].embedding`, placing each by its `index` field.
fn parse_openai_response(
    json: &serde_json::Value,
    expected: usize,
) -> Result<BatchEmbedding, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Rejected("invalid OpenAI response: missing data array".into()))?;

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item.get("embedding").ok_or_else(|| {
            EmbedError::Rejected("invalid OpenAI response: missing embedding".into())
        })?;
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(parse_vector(embedding, "OpenAI")?);
        }
    }

    Ok(BatchEmbedding {
        items: slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| EmbedError::Rejected("no embedding returned for input".into())))
            .collect(),
    })
}

// ============ Ollama ============

/// Calls `POST /api/embed` on a local Ollama instance
/// (default `http://localhost:11434`).
pub struct OllamaClient {
    model: String,
    dims: usize,
    batch_size: usize,
    url: String,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = required(&config.model, "model", "Ollama")?;
        let dims = required(&config.dims, "dims", "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size,
            url: url.trim_end_matches('/').to_string(),
            http: build_http(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    fn model_id(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<BatchEmbedding, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self.http.post(format!("{}/api/embed", self.url));
        let json = post_json(request, &body, "Ollama").await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<BatchEmbedding, EmbedError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbedError::Rejected("invalid Ollama response: missing embeddings array".into())
        })?;

    Ok(BatchEmbedding {
        items: embeddings
            .iter()
            .map(|e| parse_vector(e, "Ollama"))
            .collect(),
    })
}
