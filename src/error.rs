//! Error taxonomy for the RAG pipeline.
//!
//! Every fallible pipeline operation returns [`Result<T>`] with a
//! [`PipelineError`]. Each variant carries an [`ErrorKind`] so callers can
//! decide whether retrying the same request might succeed (a backend that
//! was down) or is pointless until something changes (a malformed dataset).

use std::path::{Path, PathBuf};

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Whether an error is worth retrying without changing inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The dataset directory is missing or unreadable.
    #[error("dataset not found: {message}")]
    DatasetNotFound { message: String },

    /// The dataset file is unreadable or structurally invalid.
    #[error("failed to ingest {}: {message}", .path.display())]
    Ingest { path: PathBuf, message: String },

    /// A backend could not be reached at probe or call time.
    #[error("backend unavailable at {endpoint}: {message}")]
    BackendUnavailable { endpoint: String, message: String },

    /// The generative backend answered with an error status or an unusable body.
    #[error("generation failed: {message}")]
    Generation {
        message: String,
        status: Option<u16>,
    },

    /// A question was asked before any dataset was indexed.
    #[error("no active pipeline: no dataset has been indexed yet")]
    NoActivePipeline,

    /// The embedding model failed to load or produce vectors.
    #[error("embedding failed: {message}")]
    Embedding { message: String, retryable: bool },

    /// Building, persisting, or searching the vector index failed.
    #[error("index error: {message}")]
    Index { message: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BackendUnavailable { .. } | Self::NoActivePipeline => ErrorKind::Retryable,
            Self::Generation { status, .. } => match status {
                Some(code) if *code < 500 && *code != 429 => ErrorKind::Fatal,
                _ => ErrorKind::Retryable,
            },
            Self::Embedding { retryable, .. } => {
                if *retryable {
                    ErrorKind::Retryable
                } else {
                    ErrorKind::Fatal
                }
            }
            Self::DatasetNotFound { .. }
            | Self::Ingest { .. }
            | Self::Index { .. }
            | Self::Config { .. }
            | Self::InvalidInput { .. } => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    pub fn ingest(path: &Path, message: impl std::fmt::Display) -> Self {
        Self::Ingest {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn unavailable(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn generation(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Generation {
            message: message.into(),
            status,
        }
    }

    pub fn embedding(message: impl std::fmt::Display, retryable: bool) -> Self {
        Self::Embedding {
            message: message.to_string(),
            retryable,
        }
    }

    pub fn index(message: impl std::fmt::Display) -> Self {
        Self::Index {
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        Self::index(format!("index storage: {}", e))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::index(format!("background task failed: {}", e))
    }
}
