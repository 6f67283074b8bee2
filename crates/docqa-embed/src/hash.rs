//! Deterministic, model-free backends for tests and offline runs.
use anyhow::Result;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use docqa_core::analysis::terms;
use docqa_core::{CrossEncoder, Embedder};

/// Bag-of-words vector: each term hashes into one of `dim` buckets.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in terms(text).iter().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Query-term coverage plus a bonus for query bigrams that appear adjacent in
/// the passage. Scores lie in [0, 1].
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalCrossEncoder;

impl CrossEncoder for LexicalCrossEncoder {
    fn score(&self, query: &str, passage: &str) -> Result<f32> {
        let q = terms(query);
        if q.is_empty() {
            return Ok(0.0);
        }
        let p = terms(passage);
        let vocab: HashSet<&str> = p.iter().map(String::as_str).collect();
        let bigrams: HashSet<(&str, &str)> = p.windows(2).map(|w| (w[0].as_str(), w[1].as_str())).collect();

        let distinct: HashSet<&str> = q.iter().map(String::as_str).collect();
        let coverage = distinct.iter().filter(|t| vocab.contains(*t)).count() as f32 / distinct.len() as f32;

        let adjacency = if q.len() < 2 {
            coverage
        } else {
            let hits = q.windows(2).filter(|w| bigrams.contains(&(w[0].as_str(), w[1].as_str()))).count();
            hits as f32 / (q.len() - 1) as f32
        };
        Ok((coverage + 0.5 * adjacency) / 1.5)
    }
}
