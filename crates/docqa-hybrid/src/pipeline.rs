use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use docqa_core::config::RetrievalSettings;
use docqa_core::{
    CancellationToken, ChunkTable, CrossEncoder, Degradation, DenseReader, Error, Hit, IndexKind, Predicate, Result,
    RetrievalResult, RetrievedPassage, SparseReader,
};

use crate::fusion::HybridMerger;
use crate::rerank::Reranker;
use crate::retry::RetryPolicy;

/// One consistent, published version of everything a query reads.
#[derive(Clone)]
pub struct IndexSnapshot {
    pub chunks: Arc<ChunkTable>,
    pub sparse: Arc<dyn SparseReader>,
    pub dense: Arc<dyn DenseReader>,
    pub generation: u64,
}

/// Retrieval stages after scope resolution: concurrent sparse and dense
/// search, fusion, then a bounded rerank.
pub struct Pipeline {
    merger: HybridMerger,
    reranker: Reranker,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    candidate_pool: usize,
    rerank_timeout: Duration,
}

impl Pipeline {
    pub fn new(settings: &RetrievalSettings, encoder: Arc<dyn CrossEncoder>) -> Result<Self> {
        if settings.candidate_pool == 0 || settings.rerank_concurrency == 0 {
            return Err(Error::InvalidConfig("candidate_pool and rerank_concurrency must be positive".into()));
        }
        Ok(Self {
            merger: HybridMerger::new(settings.alpha)?,
            reranker: Reranker::new(encoder, settings.candidate_pool),
            retry: RetryPolicy::from_settings(&settings.retry),
            permits: Arc::new(Semaphore::new(settings.rerank_concurrency)),
            candidate_pool: settings.candidate_pool,
            rerank_timeout: settings.rerank_timeout(),
        })
    }

    pub fn merger(&self) -> &HybridMerger {
        &self.merger
    }

    pub async fn retrieve(
        &self,
        snapshot: &IndexSnapshot,
        predicate: Predicate,
        query: &str,
        embedding: &[f32],
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let expected = snapshot.dense.dimension();
        if embedding.len() != expected {
            return Err(Error::EmbeddingDimension { expected, actual: embedding.len() });
        }
        if top_k == 0 {
            return Ok(RetrievalResult::empty());
        }

        let predicate = Arc::new(predicate);
        let embedding: Arc<[f32]> = Arc::from(embedding);
        let searches = async {
            tokio::join!(
                self.search_sparse(snapshot, query, &predicate, cancel),
                self.search_dense(snapshot, &embedding, &predicate, cancel),
            )
        };
        let (sparse, dense) = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            out = searches => out,
        };

        let mut degraded = Vec::new();
        let (sparse_hits, dense_hits) = match (sparse, dense) {
            (Ok(s), Ok(d)) => (s, d),
            (Err(e @ Error::IndexUnavailable { .. }), Err(Error::IndexUnavailable { .. })) => return Err(e),
            (Err(Error::IndexUnavailable { reason, .. }), Ok(d)) => {
                tracing::warn!(%reason, "sparse index unavailable, continuing with dense results only");
                degraded.push(Degradation::SparseUnavailable);
                (Vec::new(), d)
            }
            (Ok(s), Err(Error::IndexUnavailable { reason, .. })) => {
                tracing::warn!(%reason, "dense index unavailable, continuing with sparse results only");
                degraded.push(Degradation::DenseUnavailable);
                (s, Vec::new())
            }
            (Err(e), _) | (_, Err(e)) => return Err(e),
        };
        tracing::debug!(sparse = sparse_hits.len(), dense = dense_hits.len(), generation = snapshot.generation, "index hits");

        let mut fused = self.merger.fuse(&sparse_hits, &dense_hits);
        fused.truncate(self.candidate_pool);
        let passages: Vec<RetrievedPassage> = fused
            .into_iter()
            .filter_map(|candidate| match snapshot.chunks.get(&candidate.chunk_id) {
                Some(chunk) => Some(RetrievedPassage { chunk: Arc::clone(chunk), score: candidate.fused_score, candidate }),
                None => {
                    tracing::warn!(id = %candidate.chunk_id, "index hit has no chunk record in this snapshot");
                    None
                }
            })
            .collect();
        if passages.is_empty() {
            return Ok(RetrievalResult { passages, degraded });
        }

        let passages = match self.rerank(query, passages, top_k, cancel).await? {
            Reranked::Ranked(p) => p,
            Reranked::TimedOut(mut fused_order) => {
                tracing::warn!(timeout = ?self.rerank_timeout, "rerank timed out, returning fused order");
                degraded.push(Degradation::RerankTimedOut);
                fused_order.truncate(top_k);
                fused_order
            }
        };
        tracing::debug!(returned = passages.len(), degraded = degraded.len(), "retrieval done");
        Ok(RetrievalResult { passages, degraded })
    }

    async fn search_sparse(
        &self,
        snapshot: &IndexSnapshot,
        query: &str,
        predicate: &Arc<Predicate>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Hit>> {
        let limit = self.candidate_pool;
        self.retry
            .run(IndexKind::Sparse, cancel, || {
                let reader = Arc::clone(&snapshot.sparse);
                let predicate = Arc::clone(predicate);
                let query = query.to_string();
                let cancel = cancel.clone();
                async move {
                    tokio::task::spawn_blocking(move || reader.search(&query, &predicate, limit, &cancel))
                        .await
                        .map_err(|e| Error::unavailable(IndexKind::Sparse, format!("search task failed: {e}")))?
                }
            })
            .await
    }

    async fn search_dense(
        &self,
        snapshot: &IndexSnapshot,
        embedding: &Arc<[f32]>,
        predicate: &Arc<Predicate>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Hit>> {
        let limit = self.candidate_pool;
        self.retry
            .run(IndexKind::Dense, cancel, || {
                let reader = Arc::clone(&snapshot.dense);
                let predicate = Arc::clone(predicate);
                let embedding = Arc::clone(embedding);
                let cancel = cancel.clone();
                async move {
                    tokio::task::spawn_blocking(move || reader.search(&embedding, &predicate, limit, &cancel))
                        .await
                        .map_err(|e| Error::unavailable(IndexKind::Dense, format!("search task failed: {e}")))?
                }
            })
            .await
    }

    /// The timeout covers queueing for a permit as well as scoring. A timed-out
    /// scoring task keeps its permit until it finishes.
    async fn rerank(
        &self,
        query: &str,
        passages: Vec<RetrievedPassage>,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Reranked> {
        let fallback = passages.clone();
        let permits = Arc::clone(&self.permits);
        let reranker = self.reranker.clone();
        let query = query.to_string();
        let scoring = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| Error::Backend("reranker semaphore closed".into()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                reranker.rerank(&query, passages, top_k)
            })
            .await
            .map_err(|e| Error::Backend(format!("rerank task failed: {e}")))?
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = tokio::time::timeout(self.rerank_timeout, scoring) => r,
        };
        match outcome {
            Ok(Ok(ranked)) => Ok(Reranked::Ranked(ranked)),
            Ok(Err(Error::EmptyCandidates)) => Ok(Reranked::Ranked(Vec::new())),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(Reranked::TimedOut(fallback)),
        }
    }
}

enum Reranked {
    Ranked(Vec<RetrievedPassage>),
    TimedOut(Vec<RetrievedPassage>),
}
