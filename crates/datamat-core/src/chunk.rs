//! Fixed-size, overlapping character chunker.
//!
//! Splits each [`DocumentUnit`] into [`Chunk`]s of at most `size`
//! characters, where consecutive chunks of the same unit share `overlap`
//! characters. Splitting counts Unicode scalar values and ignores word or
//! token boundaries, so the result depends only on the input text and the
//! two parameters.
//!
//! # Algorithm
//!
//! 1. Let `stride = size - overlap`.
//! 2. Windows start at character offsets `0, stride, 2 × stride, …`.
//! 3. Each window covers `[start, min(start + size, len))`.
//! 4. The window that reaches the end of the unit is the last one.
//! 5. Empty units produce no chunks.
//!
//! # Example
//!
//! ```rust
//! use datamat_core::chunk::{split, ChunkParams};
//! use datamat_core::models::DocumentUnit;
//!
//! let units = vec![DocumentUnit { index: 0, text: "abcdefghij".into() }];
//! let chunks = split(&units, &ChunkParams::new(4, 2).unwrap());
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, ["abcd", "cdef", "efgh", "ghij"]);
//! ```

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::models::{Chunk, DocumentUnit};

/// Validated chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    size: usize,
    overlap: usize,
}

impl ChunkParams {
    /// Returns an error unless `size > 0` and `overlap < size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            bail!("chunk size must be > 0");
        }
        if overlap >= size {
            bail!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap,
                size
            );
        }
        Ok(Self { size, overlap })
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn stride(&self) -> usize {
        self.size - self.overlap
    }
}

/// Split every unit in order, numbering chunks globally from 0.
pub fn split(units: &[DocumentUnit], params: &ChunkParams) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for unit in units {
        let next = chunks.len();
        chunks.extend(split_unit(unit, params, next));
    }
    chunks
}

/// Split a single unit; `first_position` is the global ordinal of its first chunk.
pub fn split_unit(unit: &DocumentUnit, params: &ChunkParams, first_position: usize) -> Vec<Chunk> {
    // Byte offset of every char, so windows never cut a UTF-8 sequence.
    let starts: Vec<usize> = unit.text.char_indices().map(|(i, _)| i).collect();
    let len = starts.len();
    let byte_at = |char_idx: usize| {
        if char_idx >= len {
            unit.text.len()
        } else {
            starts[char_idx]
        }
    };

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + params.size).min(len);
        let text = &unit.text[byte_at(start)..byte_at(end)];
        chunks.push(make_chunk(first_position + chunks.len(), unit.index, start, text));
        if end == len {
            break;
        }
        start += params.stride();
    }
    chunks
}

fn make_chunk(position: usize, unit_index: usize, offset: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());

    Chunk {
        position,
        unit_index,
        offset,
        text: text.to_string(),
        hash: format!("{:x}", hasher.finalize()),
    }
}
