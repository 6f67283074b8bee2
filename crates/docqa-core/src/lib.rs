pub mod analysis;
pub mod config;
pub mod error;
pub mod registry;
pub mod scope;
pub mod store;
pub mod traits;
pub mod types;

pub use config::{expand_path, Config, Settings};
pub use error::{Error, IndexKind, Result};
pub use registry::{InMemoryRegistry, MetadataRegistry};
pub use scope::{Predicate, ScopeFilter, ScopeSelection};
pub use store::ChunkTable;
pub use tokio_util::sync::CancellationToken;
pub use traits::{CrossEncoder, DenseReader, Embedder, SparseReader};
pub use types::{
    Chunk, ChunkId, Degradation, DocType, Hit, IngestReport, RetrievalResult, RetrievedPassage,
    ScoredCandidate, SourceKind,
};
