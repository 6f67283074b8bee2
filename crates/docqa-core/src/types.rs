//! Domain types shared by the sparse, dense and hybrid crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Error;

pub type ChunkId = String;

/// Document category a file was uploaded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Spec,
    Contract,
    Drawing,
    Other,
}

impl DocType {
    pub const ALL: [DocType; 4] = [DocType::Spec, DocType::Contract, DocType::Drawing, DocType::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Spec => "spec",
            DocType::Contract => "contract",
            DocType::Drawing => "drawing",
            DocType::Other => "other",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spec" | "specification" => Ok(DocType::Spec),
            "contract" => Ok(DocType::Contract),
            "drawing" => Ok(DocType::Drawing),
            "other" => Ok(DocType::Other),
            other => Err(Error::InvalidScope(format!("unknown document type '{other}'"))),
        }
    }
}

/// A unit of ingested document text.
///
/// - `id`: globally unique chunk identifier, assigned by ingestion
/// - `project_id`/`doc_type`/`file_id`: the three levels of the scope cascade
/// - `position`: ordinal of the chunk within its file
/// - `embedding`: precomputed dense vector of the configured dimension
/// - `page`/`section`: provenance for citations, when the parser knows them
/// - `context`: text of the enclosing parent section. Never indexed or scored;
///   handed to the generator in place of the child's own text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub project_id: String,
    pub doc_type: DocType,
    pub file_id: String,
    pub position: u32,
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// The minimal surface returned by both indexes. Higher score is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: ChunkId,
    pub score: f32,
}

impl Hit {
    pub fn new(id: impl Into<ChunkId>, score: f32) -> Self {
        Self { id: id.into(), score }
    }
}

/// Which retrieval signal(s) surfaced a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Sparse,
    Dense,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub chunk_id: ChunkId,
    pub source: SourceKind,
    pub sparse_score: Option<f32>,
    pub dense_score: Option<f32>,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

/// A reason the result came from a reduced pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    SparseUnavailable,
    DenseUnavailable,
    RerankTimedOut,
}

/// One passage handed to the answer generator.
///
/// `score` is the rerank score, or the fused score when reranking was skipped.
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub candidate: ScoredCandidate,
}

impl RetrievedPassage {
    /// Parent context when the chunk carries one, otherwise the chunk text.
    pub fn context(&self) -> &str {
        self.chunk.context.as_deref().unwrap_or(&self.chunk.text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub passages: Vec<RetrievedPassage>,
    pub degraded: Vec<Degradation>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.passages.iter().map(|p| p.chunk.id.as_str()).collect()
    }
}

/// Outcome of a partial-success ingestion batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub accepted: Vec<ChunkId>,
    pub rejected: Vec<(ChunkId, Error)>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}
