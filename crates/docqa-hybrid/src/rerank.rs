use std::cmp::Ordering;
use std::sync::Arc;

use docqa_core::{CrossEncoder, Error, Result, RetrievedPassage};

/// Second-pass ordering by a cross-encoder over the head of the fused list.
#[derive(Clone)]
pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
    candidate_pool: usize,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>, candidate_pool: usize) -> Self {
        Self { encoder, candidate_pool }
    }

    pub fn candidate_pool(&self) -> usize {
        self.candidate_pool
    }

    /// `candidates` arrive in fused order with `score` set to the fused score.
    /// Only the first `candidate_pool` are scored; at most `top_k` come back,
    /// ordered by rerank score, then fused score, then chunk id.
    pub fn rerank(&self, query: &str, mut candidates: Vec<RetrievedPassage>, top_k: usize) -> Result<Vec<RetrievedPassage>> {
        if candidates.is_empty() {
            return Err(Error::EmptyCandidates);
        }
        candidates.truncate(self.candidate_pool);

        let passages: Vec<&str> = candidates.iter().map(|c| c.chunk.text.as_str()).collect();
        let scores = self
            .encoder
            .score_batch(query, &passages)
            .map_err(|e| Error::Backend(format!("cross-encoder failed: {e:#}")))?;
        if scores.len() != candidates.len() {
            return Err(Error::Backend(format!(
                "cross-encoder returned {} scores for {} passages",
                scores.len(),
                candidates.len()
            )));
        }

        for (c, s) in candidates.iter_mut().zip(scores) {
            let s = if s.is_finite() { s } else { f32::MIN };
            c.candidate.rerank_score = Some(s);
            c.score = s;
        }
        candidates.sort_by(rerank_order);
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

fn rerank_order(a: &RetrievedPassage, b: &RetrievedPassage) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.candidate.fused_score.total_cmp(&a.candidate.fused_score))
        .then_with(|| a.candidate.chunk_id.cmp(&b.candidate.chunk_id))
}
