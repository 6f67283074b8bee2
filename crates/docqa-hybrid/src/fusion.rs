//! Weighted score fusion of the sparse and dense result lists.
//!
//! Each list is min-max normalized on its own, per query, then combined as
//! `alpha * dense + (1 - alpha) * sparse` with a missing side counting as 0.
use std::cmp::Ordering;
use std::collections::HashMap;

use docqa_core::{Error, Hit, Result, ScoredCandidate, SourceKind};

/// Raw score per id. Duplicate ids keep their best score; non-finite scores
/// are dropped.
fn best_scores(hits: &[Hit]) -> HashMap<&str, f32> {
    let mut by_id: HashMap<&str, f32> = HashMap::with_capacity(hits.len());
    for h in hits {
        if !h.score.is_finite() {
            tracing::warn!(id = %h.id, score = h.score, "dropping non-finite retrieval score");
            continue;
        }
        by_id
            .entry(h.id.as_str())
            .and_modify(|s| *s = s.max(h.score))
            .or_insert(h.score);
    }
    by_id
}

/// Min-max to [0, 1]. A list whose scores are all equal, including a
/// singleton, maps every entry to 1.0.
pub fn min_max(scores: &HashMap<&str, f32>) -> HashMap<String, f32> {
    let (lo, hi) = scores
        .values()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| (lo.min(*s), hi.max(*s)));
    let span = hi - lo;
    scores
        .iter()
        .map(|(id, s)| {
            let norm = if span > 0.0 { (s - lo) / span } else { 1.0 };
            (id.to_string(), norm)
        })
        .collect()
}

/// Fused order: score desc, then candidates seen by both indexes, then id asc.
pub fn fused_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| (b.source == SourceKind::Both).cmp(&(a.source == SourceKind::Both)))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

#[derive(Debug, Clone, Copy)]
pub struct HybridMerger {
    alpha: f32,
}

impl HybridMerger {
    pub fn new(alpha: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::InvalidConfig(format!("fusion alpha must be within [0, 1], got {alpha}")));
        }
        Ok(Self { alpha })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// One candidate per chunk id, in fused order.
    pub fn fuse(&self, sparse: &[Hit], dense: &[Hit]) -> Vec<ScoredCandidate> {
        let sparse_raw = best_scores(sparse);
        let dense_raw = best_scores(dense);
        let sparse_norm = min_max(&sparse_raw);
        let dense_norm = min_max(&dense_raw);

        let mut ids: Vec<&str> = sparse_raw.keys().chain(dense_raw.keys()).copied().collect();
        ids.sort_unstable();
        ids.dedup();

        let mut fused: Vec<ScoredCandidate> = ids
            .into_iter()
            .map(|id| {
                let s = sparse_raw.get(id).copied();
                let d = dense_raw.get(id).copied();
                let source = match (s, d) {
                    (Some(_), Some(_)) => SourceKind::Both,
                    (Some(_), None) => SourceKind::Sparse,
                    _ => SourceKind::Dense,
                };
                let sn = sparse_norm.get(id).copied().unwrap_or(0.0);
                let dn = dense_norm.get(id).copied().unwrap_or(0.0);
                ScoredCandidate {
                    chunk_id: id.to_string(),
                    source,
                    sparse_score: s,
                    dense_score: d,
                    fused_score: self.alpha * dn + (1.0 - self.alpha) * sn,
                    rerank_score: None,
                }
            })
            .collect();
        fused.sort_by(fused_order);
        fused
    }
}
