//! In-memory vector index with exact inner-product search.
//!
//! The index holds chunks and their vectors in insertion order. Search is
//! brute force over every stored vector: datasets handled here are a single
//! uploaded table, so an exact scan is fast enough and keeps ranking fully
//! deterministic.
//!
//! # Ranking
//!
//! 1. Score every chunk by `dot(query, vector)`.
//! 2. Sort by score (desc), then by insertion position (asc).
//! 3. Truncate to `k`.

use anyhow::{bail, Result};
use std::cmp::Ordering;

use crate::models::{Chunk, ScoredChunk};
use crate::vector::dot;

/// An immutable collection of `(Chunk, vector)` pairs.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dims: usize,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Build an index from chunks and their vectors, paired by position.
    ///
    /// Fails if the two sequences differ in length or if vectors do not
    /// share one dimensionality. An empty index has `dims() == 0`.
    pub fn build(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            bail!(
                "index build received {} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
            bail!(
                "vector {} has {} dimensions, expected {}",
                i,
                v.len(),
                dims
            );
        }
        if dims == 0 && !chunks.is_empty() {
            bail!("vectors must have at least one dimension");
        }
        Ok(Self {
            dims,
            chunks,
            vectors,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterate `(chunk, vector)` pairs in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&Chunk, &[f32])> {
        self.chunks
            .iter()
            .zip(self.vectors.iter().map(Vec::as_slice))
    }

    /// Return up to `k` chunks by descending similarity.
    ///
    /// Equal scores keep insertion order. Fails if the query has a
    /// different dimensionality than the indexed vectors.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            bail!(
                "query has {} dimensions, index has {}",
                query.len(),
                self.dims
            );
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(query, v)))
            .collect();

        let by_rank = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_rank);
            scored.truncate(k);
        }
        scored.sort_by(by_rank);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }
}
