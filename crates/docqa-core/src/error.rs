use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::ChunkId;

/// Which retrieval backend an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Sparse,
    Dense,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Sparse => f.write_str("sparse"),
            IndexKind::Dense => f.write_str("dense"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or contradictory scope selection. User-facing, never retried.
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Query or chunk embedding does not match the index dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimension { expected: usize, actual: usize },

    /// The reranker was handed nothing to rank.
    #[error("No candidates to rerank")]
    EmptyCandidates,

    #[error("Reranker did not finish within {0:?}")]
    RerankTimeout(Duration),

    #[error("Duplicate chunk id: {0}")]
    DuplicateChunk(ChunkId),

    #[error("Invalid chunk {id}: {reason}")]
    InvalidChunk { id: ChunkId, reason: String },

    /// Backend could not be reached. Transient: retried at the adapter boundary.
    #[error("{index} index unavailable: {reason}")]
    IndexUnavailable { index: IndexKind, reason: String },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Whether retrying the same call can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::IndexUnavailable { .. })
    }

    pub fn unavailable(index: IndexKind, reason: impl Into<String>) -> Self {
        Error::IndexUnavailable { index, reason: reason.into() }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
