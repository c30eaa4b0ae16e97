//! # datamat-rag
//!
//! Retrieval-augmented question answering over a single uploaded tabular
//! dataset.
//!
//! The newest CSV file in the dataset directory is ingested row by row,
//! split into overlapping character chunks, embedded, and indexed. Questions
//! are answered by retrieving the nearest chunks and handing them, with the
//! question, to a generative model served by Ollama.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌─────────┐   ┌─────────────┐
//! │ datasets │──▶│ Ingest  │──▶│  Chunk  │──▶│ Embed+Index │
//! │  *.csv   │   │ rows    │   │ overlap │   │ build-<uuid>│
//! └──────────┘   └─────────┘   └─────────┘   └──────┬──────┘
//!                                                  │ swap
//!                                                  ▼
//!                question ──▶ Retriever ──▶ QaChain ──▶ Ollama
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! datamat datasets              # list candidate files
//! datamat setup                 # build the index for the newest file
//! datamat ask "Which region sold the most?"
//! datamat health                # is the generative backend up?
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`dataset`] | Dataset discovery and selection |
//! | [`ingest`] | CSV rows to document units |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Generative backend abstraction |
//! | [`chain`] | Retriever and QA chain |
//! | [`pipeline`] | Lifecycle manager |
//! | [`store`] | Index persistence |
//! | [`db`] | Database connection |
//! | [`migrate`] | Index schema |

pub mod chain;
pub mod config;
pub mod dataset;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod pipeline;
pub mod store;
