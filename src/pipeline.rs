//! Pipeline lifecycle: dataset selection, rebuild, and the active chain.
//!
//! [`PipelineManager`] owns the one active [`QaChain`]. Readers clone an
//! `Arc` of it and never wait on a rebuild; rebuilds are serialized by an
//! async mutex and publish their result by swapping the handle.
//!
//! # Rebuild
//!
//! ```text
//! discover datasets ─▶ select newest ─▶ unchanged? ─yes─▶ keep active chain
//!                                           │ no
//!                                           ▼
//!                           probe backend (fail fast)
//!                                           ▼
//!             fresh location <index.root>/build-<uuid>
//!                                           ▼
//!        ingest ─▶ chunk ─▶ embed ─▶ index ─▶ persist + verify
//!                                           ▼
//!                 swap active chain, reclaim previous location
//! ```
//!
//! A failure at any stage removes the half-built location and leaves the
//! previously active chain in place. An empty dataset directory clears the
//! active chain, since no dataset is active any more.
//!
//! Progress is published on a `watch` channel as [`BuildStatus`].

use chrono::Utc;
use datamat_core::chunk::{split, ChunkParams};
use datamat_core::index::VectorIndex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chain::{QaChain, Retriever};
use crate::config::Config;
use crate::dataset::{self, Dataset};
use crate::embedding::{create_embedder, embed_all, Embedder};
use crate::error::{PipelineError, Result};
use crate::generation::{GenerativeBackend, OllamaBackend};
use crate::ingest;
use crate::store::{self, IndexStats};

const BUILD_PREFIX: &str = "build-";

/// Observable state of the most recent rebuild.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildStatus {
    Idle,
    Building { dataset: PathBuf },
    Ready { stats: IndexStats },
    Failed { message: String, retryable: bool },
}

#[derive(Default)]
struct BuildState {
    swept: bool,
}

pub struct PipelineManager {
    config: Config,
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn GenerativeBackend>,
    active: RwLock<Option<Arc<QaChain>>>,
    build: Mutex<BuildState>,
    status: watch::Sender<BuildStatus>,
}

impl PipelineManager {
    /// Create a manager with the configured embedding provider and Ollama backend.
    ///
    /// No model is loaded and no backend is contacted until the first setup.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let embedder = create_embedder(&config.embedding)?;
        let backend: Arc<dyn GenerativeBackend> = Arc::new(OllamaBackend::new(&config.generation)?);
        Ok(Self::with_components(config, embedder, backend))
    }

    /// Create a manager around caller-supplied providers.
    pub fn with_components(
        config: Config,
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn GenerativeBackend>,
    ) -> Self {
        let (status, _) = watch::channel(BuildStatus::Idle);
        Self {
            config,
            embedder,
            backend,
            active: RwLock::new(None),
            build: Mutex::new(BuildState::default()),
            status,
        }
    }

    /// The active chain, if any dataset has been indexed.
    pub fn current(&self) -> Option<Arc<QaChain>> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn stats(&self) -> Option<IndexStats> {
        self.current().map(|chain| chain.stats().clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<BuildStatus> {
        self.status.subscribe()
    }

    pub fn list_datasets(&self) -> Result<Vec<Dataset>> {
        dataset::discover(&self.config.dataset)
    }

    /// Whether the generative backend answers its liveness probe.
    pub async fn health(&self) -> bool {
        match self.backend.probe().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    /// Answer `question` with the active chain.
    pub async fn ask(&self, question: &str) -> Result<String> {
        let chain = self.current().ok_or(PipelineError::NoActivePipeline)?;
        chain.answer(question).await
    }

    /// Build (or reuse) the chain for the newest dataset.
    ///
    /// Returns `Ok(None)` when the dataset directory holds no candidates.
    /// With `force_reload == false` an active chain built from the same
    /// dataset file and modification time is returned as is.
    pub async fn setup(&self, force_reload: bool) -> Result<Option<Arc<QaChain>>> {
        let mut state = self.build.lock().await;
        if !state.swept {
            self.sweep_stale_builds().await;
            state.swept = true;
        }

        let result = self.run_setup(force_reload).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "pipeline setup failed");
            self.status.send_replace(BuildStatus::Failed {
                message: e.to_string(),
                retryable: e.is_retryable(),
            });
        }
        result
    }

    /// Run [`setup`](Self::setup) on a background task.
    ///
    /// Completion is observable through [`subscribe`](Self::subscribe) or
    /// by awaiting the returned handle.
    pub fn setup_in_background(
        self: &Arc<Self>,
        force_reload: bool,
    ) -> JoinHandle<Result<Option<Arc<QaChain>>>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.setup(force_reload).await })
    }

    async fn run_setup(&self, force_reload: bool) -> Result<Option<Arc<QaChain>>> {
        let candidates = dataset::discover(&self.config.dataset)?;
        let Some(dataset) = dataset::select_active(candidates) else {
            tracing::info!(dir = %self.config.dataset.dir.display(), "no dataset found");
            if let Some(old) = self.replace_active(None) {
                reclaim(old.stats().location.clone());
            }
            self.status.send_replace(BuildStatus::Idle);
            return Ok(None);
        };

        if !force_reload {
            if let Some(chain) = self.current() {
                let stats = chain.stats();
                if stats.dataset == dataset.path && stats.dataset_modified == dataset.modified {
                    tracing::info!(dataset = %dataset.name, "dataset unchanged; reusing index");
                    return Ok(Some(chain));
                }
            }
        }

        tracing::info!(dataset = %dataset.path.display(), force_reload, "rebuilding pipeline");
        self.status.send_replace(BuildStatus::Building {
            dataset: dataset.path.clone(),
        });

        self.backend.probe().await?;

        let location = self
            .config
            .index
            .root
            .join(format!("{}{}", BUILD_PREFIX, Uuid::new_v4()));
        let _ = tokio::fs::remove_dir_all(&location).await;
        tokio::fs::create_dir_all(&location).await.map_err(|e| {
            PipelineError::index(format!("cannot create {}: {}", location.display(), e))
        })?;

        let chain = match self.build_chain(&dataset, &location).await {
            Ok(chain) => Arc::new(chain),
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&location).await;
                return Err(e);
            }
        };

        if let Some(old) = self.replace_active(Some(Arc::clone(&chain))) {
            reclaim(old.stats().location.clone());
        }

        let stats = chain.stats().clone();
        tracing::info!(
            dataset = %stats.dataset.display(),
            rows = stats.rows,
            chunks = stats.chunks,
            location = %stats.location.display(),
            "pipeline ready"
        );
        self.status.send_replace(BuildStatus::Ready { stats });
        Ok(Some(chain))
    }

    async fn build_chain(&self, dataset: &Dataset, location: &Path) -> Result<QaChain> {
        let params = ChunkParams::new(
            self.config.chunking.chunk_size,
            self.config.chunking.chunk_overlap,
        )
        .map_err(|e| PipelineError::config(e.to_string()))?;

        let path = dataset.path.clone();
        let units = tokio::task::spawn_blocking(move || ingest::ingest(&path)).await??;
        let chunks = split(&units, &params);
        tracing::info!(rows = units.len(), chunks = chunks.len(), "dataset chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_all(
            self.embedder.as_ref(),
            &texts,
            self.config.embedding.batch_size,
        )
        .await?;

        let index = VectorIndex::build(chunks, vectors).map_err(PipelineError::index)?;
        let stats = IndexStats {
            dataset: dataset.path.clone(),
            dataset_modified: dataset.modified,
            rows: units.len(),
            chunks: index.len(),
            model: self.embedder.model_name().to_string(),
            dims: index.dims(),
            location: location.to_path_buf(),
            built_at: Utc::now(),
        };
        store::persist(location, &index, &stats).await?;

        let retriever = Retriever::new(
            Arc::new(index),
            Arc::clone(&self.embedder),
            self.config.retrieval.k,
        );
        Ok(QaChain::new(
            retriever,
            Arc::clone(&self.backend),
            self.config.generation.max_context_chars,
            stats,
        ))
    }

    fn replace_active(&self, chain: Option<Arc<QaChain>>) -> Option<Arc<QaChain>> {
        let mut active = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *active, chain)
    }

    /// Remove `build-*` directories left behind by earlier processes.
    async fn sweep_stale_builds(&self) {
        let keep = self.current().map(|c| c.stats().location.clone());
        let mut entries = match tokio::fs::read_dir(&self.config.index.root).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_build = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(BUILD_PREFIX));
            if is_build && keep.as_deref() != Some(path.as_path()) {
                tracing::debug!(location = %path.display(), "removing stale build");
                let _ = tokio::fs::remove_dir_all(&path).await;
            }
        }
    }
}

/// Delete a retired build location in the background.
fn reclaim(location: PathBuf) {
    tokio::spawn(async move {
        match tokio::fs::remove_dir_all(&location).await {
            Ok(()) => tracing::debug!(location = %location.display(), "reclaimed old index"),
            Err(e) => {
                tracing::warn!(location = %location.display(), error = %e, "failed to reclaim old index")
            }
        }
    });
}
