use std::collections::HashSet;
use std::sync::Arc;

use docqa_core::config::Metric;
use docqa_core::{Chunk, ChunkId, DocType, Error, Result};

/// Immutable column block of embeddings plus the scope columns the
/// pre-filter reads. Vectors are stored row-major in one flat buffer.
#[derive(Debug)]
pub struct DenseSegment {
    dim: usize,
    ids: Vec<ChunkId>,
    projects: Vec<Arc<str>>,
    doc_types: Vec<DocType>,
    files: Vec<Arc<str>>,
    vectors: Vec<f32>,
}

impl DenseSegment {
    /// Build from chunks whose embeddings were already validated. With
    /// [`Metric::Cosine`] rows are L2-normalized here.
    pub fn build(dim: usize, metric: Metric, chunks: &[Arc<Chunk>]) -> Result<Self> {
        let mut seg = Self {
            dim,
            ids: Vec::with_capacity(chunks.len()),
            projects: Vec::with_capacity(chunks.len()),
            doc_types: Vec::with_capacity(chunks.len()),
            files: Vec::with_capacity(chunks.len()),
            vectors: Vec::with_capacity(chunks.len() * dim),
        };
        for c in chunks {
            if c.embedding.len() != dim {
                return Err(Error::EmbeddingDimension { expected: dim, actual: c.embedding.len() });
            }
            seg.ids.push(c.id.clone());
            seg.projects.push(Arc::from(c.project_id.as_str()));
            seg.doc_types.push(c.doc_type);
            seg.files.push(Arc::from(c.file_id.as_str()));
            match metric {
                Metric::Cosine => seg.vectors.extend(l2_normalized(&c.embedding)),
                Metric::Dot => seg.vectors.extend_from_slice(&c.embedding),
            }
        }
        Ok(seg)
    }

    /// Copy of this segment without the rows in `removed`, or `None` when no
    /// row is affected.
    pub fn without(&self, removed: &HashSet<ChunkId>) -> Option<Self> {
        if !self.ids.iter().any(|id| removed.contains(id)) {
            return None;
        }
        let mut seg = Self {
            dim: self.dim,
            ids: Vec::new(),
            projects: Vec::new(),
            doc_types: Vec::new(),
            files: Vec::new(),
            vectors: Vec::new(),
        };
        for row in 0..self.len() {
            if removed.contains(&self.ids[row]) {
                continue;
            }
            seg.push_row(self, row);
        }
        Some(seg)
    }

    /// Concatenate segments into one.
    pub fn merge(dim: usize, parts: &[Arc<DenseSegment>]) -> Self {
        let rows = parts.iter().map(|p| p.len()).sum::<usize>();
        let mut seg = Self {
            dim,
            ids: Vec::with_capacity(rows),
            projects: Vec::with_capacity(rows),
            doc_types: Vec::with_capacity(rows),
            files: Vec::with_capacity(rows),
            vectors: Vec::with_capacity(rows * dim),
        };
        for part in parts {
            for row in 0..part.len() {
                seg.push_row(part, row);
            }
        }
        seg
    }

    fn push_row(&mut self, src: &DenseSegment, row: usize) {
        self.ids.push(src.ids[row].clone());
        self.projects.push(Arc::clone(&src.projects[row]));
        self.doc_types.push(src.doc_types[row]);
        self.files.push(Arc::clone(&src.files[row]));
        self.vectors.extend_from_slice(src.vector(row));
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, row: usize) -> &str {
        &self.ids[row]
    }

    pub fn scope_of(&self, row: usize) -> (&str, DocType, &str) {
        (&*self.projects[row], self.doc_types[row], &*self.files[row])
    }

    pub fn vector(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dim..(row + 1) * self.dim]
    }
}

pub fn l2_normalized(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
