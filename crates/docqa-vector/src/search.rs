use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use tokio_util::sync::CancellationToken;

use docqa_core::config::Metric;
use docqa_core::{DenseReader, Error, Hit, Predicate, Result};

use crate::index::DenseIndex;
use crate::segment::{dot, l2_normalized};

const CANCEL_CHECK_EVERY: usize = 1024;

/// Heap entry; `Ord` puts better candidates higher (score desc, then id asc).
struct Candidate<'a> {
    score: f32,
    id: &'a str,
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(self.id))
    }
}

impl DenseReader for DenseIndex {
    fn dimension(&self) -> usize {
        self.dim()
    }

    fn len(&self) -> usize {
        self.rows()
    }

    /// Exact scan: every row passing `predicate` is scored, and the best
    /// `limit` are kept, so narrow scopes still fill up to `limit`.
    fn search(
        &self,
        embedding: &[f32],
        predicate: &Predicate,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Hit>> {
        if embedding.len() != self.dim() {
            return Err(Error::EmbeddingDimension { expected: self.dim(), actual: embedding.len() });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = match self.metric() {
            Metric::Cosine => l2_normalized(embedding),
            Metric::Dot => embedding.to_vec(),
        };

        let mut heap: BinaryHeap<Reverse<Candidate<'_>>> = BinaryHeap::with_capacity(limit + 1);
        let mut scanned = 0usize;
        let mut in_scope = 0usize;
        for seg in self.segments() {
            for row in 0..seg.len() {
                scanned += 1;
                if scanned % CANCEL_CHECK_EVERY == 0 && cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let (project, doc_type, file) = seg.scope_of(row);
                if !predicate.matches_parts(project, doc_type, file) {
                    continue;
                }
                in_scope += 1;
                heap.push(Reverse(Candidate { score: dot(&query, seg.vector(row)), id: seg.id(row) }));
                if heap.len() > limit {
                    heap.pop();
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // into_sorted_vec is ascending over Reverse, i.e. best first
        let hits: Vec<Hit> = heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(c)| Hit::new(c.id, c.score))
            .collect();
        tracing::trace!(scanned, in_scope, hits = hits.len(), "dense search");
        Ok(hits)
    }
}
