//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, see [`Config::minimal`]) yields a working local setup: datasets in
//! `./datasets`, the index under `./chroma_db`, local `bge-base-en-v1.5`
//! embeddings and `llama3.2` served by Ollama on `localhost:11434`.
//!
//! ```toml
//! [dataset]
//! dir = "datasets"
//! extensions = ["csv"]
//!
//! [index]
//! root = "chroma_db"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "local"
//! model = "bge-base-en-v1.5"
//! device = "cpu"
//! normalize = true
//!
//! [retrieval]
//! k = 100
//!
//! [generation]
//! base_url = "http://localhost:11434"
//! model = "llama3.2"
//! temperature = 0.7
//! num_ctx = 4096
//! max_context_chars = 12000
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    #[serde(default = "default_dataset_dir")]
    pub dir: PathBuf,
    /// File extensions (without the dot, case-insensitive) that count as datasets.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            dir: default_dataset_dir(),
            extensions: default_extensions(),
        }
    }
}

fn default_dataset_dir() -> PathBuf {
    PathBuf::from("datasets")
}
fn default_extensions() -> Vec<String> {
    vec!["csv".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory owned exclusively by the index; every build lives in a
    /// `build-<uuid>` subdirectory.
    #[serde(default = "default_index_root")]
    pub root: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_index_root(),
        }
    }
}

fn default_index_root() -> PathBuf {
    PathBuf::from("chroma_db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"local"` (fastembed) or `"ollama"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Required for `ollama`; inferred from the model name for `local`.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    /// Ollama base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            device: default_device(),
            normalize: true,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "bge-base-en-v1.5".to_string()
}
fn default_device() -> String {
    "cpu".to_string()
}
fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Context window requested from the backend, in tokens.
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    /// Upper bound on the assembled context, in characters.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_generation_model(),
            temperature: default_temperature(),
            num_ctx: default_num_ctx(),
            max_context_chars: default_max_context_chars(),
            timeout_secs: default_generation_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_generation_model() -> String {
    "llama3.2".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_num_ctx() -> u32 {
    4096
}
fn default_max_context_chars() -> usize {
    12_000
}
fn default_generation_timeout() -> u64 {
    120
}
fn default_probe_timeout() -> u64 {
    5
}

impl Config {
    /// All defaults; used when no configuration file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.dataset.extensions.is_empty() {
            return Err(PipelineError::config("dataset.extensions must not be empty"));
        }
        if self.chunking.chunk_size == 0 {
            return Err(PipelineError::config("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(PipelineError::config(format!(
                "chunking.chunk_overlap ({}) must be < chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.k == 0 {
            return Err(PipelineError::config("retrieval.k must be >= 1"));
        }
        if self.embedding.batch_size == 0 {
            return Err(PipelineError::config("embedding.batch_size must be > 0"));
        }
        if self.embedding.device != "cpu" {
            return Err(PipelineError::config(format!(
                "embedding.device '{}' is not supported; only 'cpu' is available",
                self.embedding.device
            )));
        }
        match self.embedding.provider.as_str() {
            "local" => {}
            "ollama" => {
                if matches!(self.embedding.dims, None | Some(0)) {
                    return Err(PipelineError::config(
                        "embedding.dims must be > 0 when provider is 'ollama'",
                    ));
                }
            }
            other => {
                return Err(PipelineError::config(format!(
                    "unknown embedding provider '{}'; must be local or ollama",
                    other
                )))
            }
        }
        if self.generation.max_context_chars == 0 {
            return Err(PipelineError::config(
                "generation.max_context_chars must be > 0",
            ));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(PipelineError::config(
                "generation.temperature must be in [0.0, 2.0]",
            ));
        }
        if self.generation.timeout_secs == 0 || self.generation.probe_timeout_secs == 0 {
            return Err(PipelineError::config("generation timeouts must be > 0"));
        }
        Ok(())
    }
}

/// Read, parse, and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
