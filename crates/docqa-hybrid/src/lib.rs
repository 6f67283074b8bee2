//! docqa-hybrid
//!
//! Hybrid retrieval over one published snapshot: weighted fusion of the
//! sparse and dense lists, a bounded cross-encoder rerank, and the
//! [`KnowledgeBase`] that ingests chunks and publishes snapshots.
pub mod fusion;
pub mod knowledge_base;
pub mod pipeline;
pub mod rerank;
pub mod retry;

pub use fusion::HybridMerger;
pub use knowledge_base::{KbStats, KnowledgeBase};
pub use pipeline::{IndexSnapshot, Pipeline};
pub use rerank::Reranker;
pub use retry::RetryPolicy;
