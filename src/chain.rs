//! Retrieval and question answering over one built index.
//!
//! A [`QaChain`] is immutable once built: it owns an `Arc` of the index it
//! searches, the embedder that produced that index, and the generative
//! backend. Rebuilding the pipeline produces a new chain rather than
//! modifying this one, so a caller holding an `Arc<QaChain>` keeps a
//! consistent view for the whole question.

use datamat_core::index::VectorIndex;
use datamat_core::models::ScoredChunk;
use datamat_core::prompt::{assemble_context, build_prompt};
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{PipelineError, Result};
use crate::generation::GenerativeBackend;
use crate::store::IndexStats;

/// Embeds questions and searches one index with a fixed `k`.
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>, k: usize) -> Self {
        Self { index, embedder, k }
    }

    /// Top-`k` chunks for `question` with the configured `k`.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredChunk>> {
        self.retrieve_k(question, self.k).await
    }

    /// Top chunks for `question`; returns exactly `min(k, index size)` results.
    pub async fn retrieve_k(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let query = self.embedder.embed(question).await?;
        self.index.search(&query, k).map_err(PipelineError::index)
    }
}

/// A retriever bound to a generative backend.
pub struct QaChain {
    retriever: Retriever,
    backend: Arc<dyn GenerativeBackend>,
    max_context_chars: usize,
    stats: IndexStats,
}

impl QaChain {
    pub fn new(
        retriever: Retriever,
        backend: Arc<dyn GenerativeBackend>,
        max_context_chars: usize,
        stats: IndexStats,
    ) -> Self {
        Self {
            retriever,
            backend,
            max_context_chars,
            stats,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Answer `question` from retrieved context.
    ///
    /// Returns the backend's raw text. Fails with `InvalidInput` for a blank
    /// question and propagates retrieval and generation errors unchanged.
    pub async fn answer(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::InvalidInput {
                message: "question must not be empty".to_string(),
            });
        }

        let hits = self.retriever.retrieve(question).await?;
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        let context = assemble_context(&texts, self.max_context_chars);
        if context.truncated > 0 {
            tracing::debug!(
                used = context.used,
                dropped = context.truncated,
                budget = self.max_context_chars,
                "context budget reached"
            );
        }

        let prompt = build_prompt(&context.text, question);
        self.backend.generate(&prompt).await
    }
}
