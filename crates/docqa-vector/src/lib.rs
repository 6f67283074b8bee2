//! docqa-vector
//!
//! In-process dense index. Each published [`DenseIndex`] is a list of
//! immutable [`segment::DenseSegment`]s searched exactly, with the scope
//! predicate applied before ranking.
pub mod index;
pub mod search;
pub mod segment;

pub use index::DenseIndex;
pub use segment::DenseSegment;
