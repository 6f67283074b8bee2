//! Embedding and cross-encoder backends.
//!
//! Model backends run XLM-RoBERTa checkpoints through candle; the hash and
//! lexical backends are deterministic stand-ins that need no model files.
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docqa_core::config::{EmbeddingBackend, RerankerBackend, Settings};
use docqa_core::{expand_path, CrossEncoder, Embedder};

pub mod device;
pub mod embedding;
pub mod hash;
pub mod pool;
pub mod rerank;
pub mod tokenize;

pub use embedding::BgeM3Embedder;
pub use hash::{HashEmbedder, LexicalCrossEncoder};
pub use pool::masked_mean_l2;
pub use rerank::BgeReranker;

/// `APP_USE_FAKE_EMBEDDINGS=1` forces the deterministic backends.
pub fn use_fake_backends() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn default_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    let dim = settings.embedding.dimension;
    if use_fake_backends() || settings.embedding.backend == EmbeddingBackend::Hash {
        tracing::info!(dim, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(dim)));
    }
    let dir = resolve_model_dir(settings.embedding.model_dir.as_deref(), &["APP_MODEL_DIR", "MODEL_DIR"], &["../models/bge-m3", "models/bge-m3"])?;
    let model = BgeM3Embedder::load(&dir)?;
    if model.dim() != dim {
        return Err(anyhow!("model at {} produces {}-d vectors but embedding.dimension is {}", dir.display(), model.dim(), dim));
    }
    Ok(Arc::new(model))
}

pub fn default_cross_encoder(settings: &Settings) -> Result<Arc<dyn CrossEncoder>> {
    if use_fake_backends() || settings.reranker.backend == RerankerBackend::Lexical {
        tracing::info!("using lexical cross-encoder");
        return Ok(Arc::new(LexicalCrossEncoder));
    }
    let dir = resolve_model_dir(
        settings.reranker.model_dir.as_deref(),
        &["APP_RERANKER_DIR"],
        &["../models/bge-reranker-base", "models/bge-reranker-base"],
    )?;
    Ok(Arc::new(BgeReranker::load(&dir, settings.reranker.max_len)?))
}

/// First existing directory among: the configured path, the env vars in
/// order, then the fallbacks relative to the working directory.
pub fn resolve_model_dir(configured: Option<&str>, env_keys: &[&str], fallbacks: &[&str]) -> Result<PathBuf> {
    let mut tried = Vec::new();
    let candidates = configured
        .map(expand_path)
        .into_iter()
        .chain(env_keys.iter().filter_map(|k| std::env::var(k).ok()).map(expand_path))
        .chain(fallbacks.iter().map(|f| Path::new(f).to_path_buf()));
    for p in candidates {
        if p.is_dir() {
            tracing::info!(dir = %p.display(), "model directory");
            return Ok(p);
        }
        tried.push(p.display().to_string());
    }
    Err(anyhow!("Could not locate model directory (tried: {})", tried.join(", ")))
}
