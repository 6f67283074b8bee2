//! docqa-text
//!
//! Tantivy-backed sparse index. `index` owns the writer and publishes frozen
//! snapshots; `search` runs scoped BM25 queries against one snapshot.
pub mod tantivy_utils;
pub mod index;
pub mod search;

pub use index::SparseIndex;
pub use search::{ScopedStatistics, SparseSnapshot};
