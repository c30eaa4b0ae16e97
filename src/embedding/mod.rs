//! Embedding providers.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **`LocalEmbedder`**: runs a fastembed ONNX model on the CPU; the model
//!   is loaded on first use and reused for the lifetime of the embedder.
//! - **[`OllamaEmbedder`]**: calls an Ollama instance's `/api/embed` endpoint.
//!
//! Whichever provider builds an index must also embed the questions asked
//! against it, so [`create_embedder`] is called once per process and the
//! resulting `Arc<dyn Embedder>` is shared.
//!
//! # Normalization
//!
//! When `embedding.normalize` is set, every vector is scaled to unit length
//! before it leaves the provider, so the inner product used by the index
//! equals cosine similarity.
//!
//! # Retry Strategy
//!
//! The Ollama provider retries transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry, then [`PipelineError::BackendUnavailable`]
//! - backoff: 1s, 2s, 4s, … (capped at 2^5)

#[cfg(feature = "local-embeddings-fastembed")]
mod local;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

use async_trait::async_trait;
use datamat_core::vector::normalize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};

/// Maps text to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in index metadata.
    fn model_name(&self) -> &str;

    /// Vector dimensionality every call returns.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (typically a question).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::embedding("empty embedding response", false))
    }
}

/// Create the configured provider.
///
/// | `embedding.provider` | Provider |
/// |----------------------|----------|
/// | `"local"` | `LocalEmbedder` (requires feature `local-embeddings-fastembed`) |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(PipelineError::config(
            "local embedding provider requires --features local-embeddings-fastembed",
        )),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => Err(PipelineError::config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Embed `texts` in batches of `batch_size`, preserving order.
pub async fn embed_all(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let mut out = embedder.embed_batch(batch).await?;
        if out.len() != batch.len() {
            return Err(PipelineError::embedding(
                format!(
                    "provider returned {} vectors for {} texts",
                    out.len(),
                    batch.len()
                ),
                false,
            ));
        }
        vectors.append(&mut out);
    }
    Ok(vectors)
}

/// Check dimensionality and optionally normalize provider output.
pub(crate) fn finish_vectors(
    mut vectors: Vec<Vec<f32>>,
    dims: usize,
    normalize_output: bool,
) -> Result<Vec<Vec<f32>>> {
    for v in vectors.iter_mut() {
        if v.len() != dims {
            return Err(PipelineError::embedding(
                format!("expected {} dimensions, got {}", dims, v.len()),
                false,
            ));
        }
        if normalize_output {
            normalize(v);
        }
    }
    Ok(vectors)
}

// ============ Ollama Provider ============

/// Embedding provider backed by a running Ollama instance.
///
/// Calls `POST {url}/api/embed`. The model must already be pulled
/// (e.g. `ollama pull nomic-embed-text`) and `embedding.dims` must match
/// its output size.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    normalize: bool,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .filter(|d| *d > 0)
            .ok_or_else(|| PipelineError::config("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::config(format!("http client: {}", e)))?;

        Ok(Self {
            model: config.model.clone(),
            dims,
            url,
            normalize: config.normalize,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = format!("{}/api/embed", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&endpoint).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            PipelineError::embedding(format!("invalid Ollama response: {}", e), false)
                        })?;
                        let vectors = parse_ollama_response(&json)?;
                        return finish_vectors(vectors, self.dims, self.normalize);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(PipelineError::embedding(
                            format!("Ollama API error {}: {}", status, body_text),
                            true,
                        ));
                        continue;
                    }

                    return Err(PipelineError::embedding(
                        format!("Ollama API error {}: {}", status, body_text),
                        false,
                    ));
                }
                Err(e) => {
                    tracing::warn!(attempt, endpoint = %endpoint, error = %e, "embedding request failed");
                    last_err = Some(PipelineError::unavailable(&endpoint, e));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::embedding("Ollama embedding failed after retries", true)))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            PipelineError::embedding("invalid Ollama response: missing embeddings array", false)
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .ok_or_else(|| {
                    PipelineError::embedding(
                        "invalid Ollama response: embedding is not an array",
                        false,
                    )
                })
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
        })
        .collect()
}
