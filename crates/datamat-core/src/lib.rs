//! # Datamat Core
//!
//! Shared, I/O-free logic for datamat-rag: data models, the overlapping
//! character chunker, vector math, the in-memory vector index, and prompt
//! assembly for the "stuff" question-answering strategy.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! Everything here is deterministic and can be tested without a runtime.

pub mod chunk;
pub mod index;
pub mod models;
pub mod prompt;
pub mod vector;
