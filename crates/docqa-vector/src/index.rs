use std::collections::HashSet;
use std::sync::Arc;

use docqa_core::config::Metric;
use docqa_core::{Chunk, ChunkId, Result};

use crate::segment::DenseSegment;

/// Past this many segments the next write folds them into one.
const MAX_SEGMENTS: usize = 8;

/// One published version of the dense index: an ordered list of shared,
/// immutable segments. Writers derive the next version; segments untouched by
/// a write are shared between versions.
#[derive(Debug, Clone)]
pub struct DenseIndex {
    dim: usize,
    metric: Metric,
    segments: Vec<Arc<DenseSegment>>,
}

impl DenseIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self { dim, metric, segments: Vec::new() }
    }

    /// Single-segment index over `chunks`, used when reloading from the chunk store.
    pub fn build(dim: usize, metric: Metric, chunks: &[Arc<Chunk>]) -> Result<Self> {
        Self::new(dim, metric).with_added(chunks)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn rows(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn segments(&self) -> impl Iterator<Item = &DenseSegment> {
        self.segments.iter().map(AsRef::as_ref)
    }

    /// Next version with one new segment holding `chunks`.
    pub fn with_added(&self, chunks: &[Arc<Chunk>]) -> Result<Self> {
        let mut segments = self.segments.clone();
        if !chunks.is_empty() {
            segments.push(Arc::new(DenseSegment::build(self.dim, self.metric, chunks)?));
        }
        Ok(self.compacted(segments))
    }

    /// Next version without the rows whose ids are in `removed`.
    pub fn without(&self, removed: &HashSet<ChunkId>) -> Self {
        let segments = self
            .segments
            .iter()
            .filter_map(|seg| match seg.without(removed) {
                None => Some(Arc::clone(seg)),
                Some(rest) if rest.is_empty() => None,
                Some(rest) => Some(Arc::new(rest)),
            })
            .collect();
        self.compacted(segments)
    }

    fn compacted(&self, segments: Vec<Arc<DenseSegment>>) -> Self {
        let segments = if segments.len() > MAX_SEGMENTS {
            tracing::debug!(segments = segments.len(), "merging dense segments");
            vec![Arc::new(DenseSegment::merge(self.dim, &segments))]
        } else {
            segments
        };
        Self { dim: self.dim, metric: self.metric, segments }
    }
}
