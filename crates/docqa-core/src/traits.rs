use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scope::Predicate;
use crate::types::Hit;

/// Text → vector capability.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))
    }
}

/// Joint (query, passage) relevance capability. Higher is better.
pub trait CrossEncoder: Send + Sync {
    fn score(&self, query: &str, passage: &str) -> anyhow::Result<f32>;

    fn score_batch(&self, query: &str, passages: &[&str]) -> anyhow::Result<Vec<f32>> {
        passages.iter().map(|p| self.score(query, p)).collect()
    }
}

/// One published, read-only version of the sparse index.
pub trait SparseReader: Send + Sync {
    fn num_docs(&self) -> u64;

    /// Keyword search restricted to `predicate`, scored against the scoped corpus.
    fn search(
        &self,
        query: &str,
        predicate: &Predicate,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Hit>>;
}

/// One published, read-only version of the dense index.
pub trait DenseReader: Send + Sync {
    fn dimension(&self) -> usize;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nearest neighbours among the rows matching `predicate`.
    fn search(
        &self,
        embedding: &[f32],
        predicate: &Predicate,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Hit>>;
}
