//! Local CPU embeddings via fastembed.
//!
//! Models are downloaded from Hugging Face on first use and cached on disk;
//! afterwards embedding runs fully offline. The loaded model is kept behind
//! an `Arc<Mutex<_>>` so every batch after the first skips initialization.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use super::{finish_vectors, Embedder};
use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};

pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    normalize: bool,
    batch_size: usize,
    loaded: OnceCell<Arc<Mutex<fastembed::TextEmbedding>>>,
}

impl LocalEmbedder {
    /// Resolve the model name without loading it.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, model_dims) = resolve_model(&config.model)?;
        let dims = config.dims.unwrap_or(model_dims);
        Ok(Self {
            model_name: config.model.clone(),
            model,
            dims,
            normalize: config.normalize,
            batch_size: config.batch_size,
            loaded: OnceCell::new(),
        })
    }

    async fn load(&self) -> Result<Arc<Mutex<fastembed::TextEmbedding>>> {
        let handle = self
            .loaded
            .get_or_try_init(|| async {
                let model = self.model.clone();
                let name = self.model_name.clone();
                tracing::info!(model = %name, "loading local embedding model");
                let embedding = tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                })
                .await?
                .map_err(|e| {
                    PipelineError::embedding(
                        format!("failed to initialize local embedding model {}: {}", name, e),
                        false,
                    )
                })?;
                Ok::<_, PipelineError>(Arc::new(Mutex::new(embedding)))
            })
            .await?;
        Ok(Arc::clone(handle))
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.load().await?;
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| PipelineError::embedding("local embedding model lock poisoned", false))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| PipelineError::embedding(format!("local embedding failed: {}", e), false))
        })
        .await??;

        finish_vectors(vectors, self.dims, self.normalize)
    }
}

/// Resolve a supported model name to its fastembed variant and output size.
fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel::*;
    match name {
        "all-minilm-l6-v2" => Ok((AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((BGELargeENV15, 1024)),
        "nomic-embed-text-v1" => Ok((NomicEmbedTextV1, 768)),
        "nomic-embed-text-v1.5" => Ok((NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((MultilingualE5Base, 768)),
        "multilingual-e5-large" => Ok((MultilingualE5Large, 1024)),
        other => Err(PipelineError::config(format!(
            "unknown local embedding model '{}'; supported: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}
