//! Core data models that flow through the ingest → index → retrieve pipeline.

/// One row of the source dataset, serialized as `column: value` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUnit {
    /// Zero-based row index in the source file (header excluded).
    pub index: usize,
    pub text: String,
}

/// A fixed-size character span of a [`DocumentUnit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Global ordinal across the whole dataset; doubles as insertion order.
    pub position: usize,
    /// Index of the originating [`DocumentUnit`].
    pub unit_index: usize,
    /// Start offset within the unit, in characters.
    pub offset: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned from similarity search together with its score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Inner product between the query and chunk vectors.
    pub score: f32,
}
