use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use docqa_core::{
    CancellationToken, Chunk, ChunkId, ChunkTable, CrossEncoder, DocType, Error, IngestReport, MetadataRegistry, Result,
    RetrievalResult, ScopeFilter, ScopeSelection, Settings, SparseReader,
};
use docqa_text::SparseIndex;
use docqa_vector::DenseIndex;

use crate::pipeline::{IndexSnapshot, Pipeline};

const CHUNKS_FILE: &str = "chunks.jsonl";
const SPARSE_DIR: &str = "tantivy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KbStats {
    pub chunks: usize,
    pub projects: usize,
    pub files: usize,
    pub generation: u64,
}

struct Writer {
    sparse: SparseIndex,
    dense: DenseIndex,
}

/// Per-installation knowledge base: the chunk store plus both indexes,
/// published together as one [`IndexSnapshot`] per write.
pub struct KnowledgeBase {
    settings: Settings,
    pipeline: Pipeline,
    registry: Option<Arc<dyn MetadataRegistry>>,
    chunks_path: Option<PathBuf>,
    writer: Mutex<Writer>,
    current: RwLock<Arc<IndexSnapshot>>,
}

impl KnowledgeBase {
    /// Nothing is written to disk.
    pub fn in_memory(settings: Settings, encoder: Arc<dyn CrossEncoder>) -> Result<Self> {
        settings.validate()?;
        let sparse = SparseIndex::create_in_ram(settings.storage.writer_memory_bytes)?;
        let dense = DenseIndex::new(settings.embedding.dimension, settings.embedding.metric);
        Self::assemble(settings, encoder, sparse, dense, Arc::new(ChunkTable::new()), None)
    }

    /// Opens `storage.data_dir`, reloading the chunk store and rebuilding
    /// whichever index no longer agrees with it.
    pub fn open(settings: Settings, encoder: Arc<dyn CrossEncoder>) -> Result<Self> {
        settings.validate()?;
        let dir = settings
            .storage
            .data_dir_path()
            .ok_or_else(|| Error::InvalidConfig("storage.data_dir is not set".into()))?;
        std::fs::create_dir_all(&dir)?;
        let chunks_path = dir.join(CHUNKS_FILE);
        let table = Arc::new(ChunkTable::load_jsonl(&chunks_path)?);

        let sparse = SparseIndex::open(&dir.join(SPARSE_DIR), settings.storage.writer_memory_bytes)?;
        let indexed = sparse.snapshot().num_docs();
        if indexed != table.len() as u64 {
            tracing::warn!(indexed, stored = table.len(), "sparse index out of step with chunk store, rebuilding");
            sparse.clear()?;
            let all: Vec<Arc<Chunk>> = table.iter().cloned().collect();
            sparse.add_chunks(&all)?;
            sparse.commit()?;
        }

        let all: Vec<Arc<Chunk>> = table.iter().cloned().collect();
        let dense = DenseIndex::build(settings.embedding.dimension, settings.embedding.metric, &all)?;
        tracing::info!(dir = %dir.display(), chunks = table.len(), projects = table.project_count(), "knowledge base opened");
        Self::assemble(settings, encoder, sparse, dense, table, Some(chunks_path))
    }

    fn assemble(
        settings: Settings,
        encoder: Arc<dyn CrossEncoder>,
        sparse: SparseIndex,
        dense: DenseIndex,
        chunks: Arc<ChunkTable>,
        chunks_path: Option<PathBuf>,
    ) -> Result<Self> {
        let pipeline = Pipeline::new(&settings.retrieval, encoder)?;
        let snapshot = IndexSnapshot {
            chunks,
            sparse: Arc::new(sparse.snapshot()),
            dense: Arc::new(dense.clone()),
            generation: 0,
        };
        Ok(Self {
            settings,
            pipeline,
            registry: None,
            chunks_path,
            writer: Mutex::new(Writer { sparse, dense }),
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Resolve scopes against an external registry instead of the catalog
    /// derived from ingested chunks.
    pub fn with_registry(mut self, registry: Arc<dyn MetadataRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The version a query started now would read.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn stats(&self) -> KbStats {
        let snap = self.snapshot();
        KbStats {
            chunks: snap.chunks.len(),
            projects: snap.chunks.project_count(),
            files: snap.chunks.file_count(),
            generation: snap.generation,
        }
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Writer>> {
        self.writer.lock().map_err(|_| Error::Index("knowledge base writer lock poisoned".into()))
    }

    fn publish(&self, writer: &Writer, chunks: Arc<ChunkTable>, sparse: docqa_text::SparseSnapshot) -> u64 {
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let generation = current.generation + 1;
        *current = Arc::new(IndexSnapshot {
            chunks,
            sparse: Arc::new(sparse),
            dense: Arc::new(writer.dense.clone()),
            generation,
        });
        generation
    }

    /// Add a batch. Invalid chunks are reported and skipped; the rest become
    /// visible together in one new snapshot.
    pub fn ingest(&self, chunks: Vec<Chunk>) -> Result<IngestReport> {
        let mut writer = self.lock_writer()?;
        let current = self.snapshot();
        let mut report = IngestReport::default();
        let mut accepted: Vec<Arc<Chunk>> = Vec::new();
        let mut batch_ids: HashSet<ChunkId> = HashSet::new();
        let mut batch_files: HashMap<(String, String), DocType> = HashMap::new();

        for chunk in chunks {
            match self.validate(&chunk, &current.chunks, &batch_ids, &batch_files) {
                Ok(()) => {
                    batch_ids.insert(chunk.id.clone());
                    batch_files.insert((chunk.project_id.clone(), chunk.file_id.clone()), chunk.doc_type);
                    report.accepted.push(chunk.id.clone());
                    accepted.push(Arc::new(chunk));
                }
                Err(e) => {
                    tracing::warn!(id = %chunk.id, error = %e, "rejected chunk");
                    report.rejected.push((chunk.id, e));
                }
            }
        }
        if accepted.is_empty() {
            return Ok(report);
        }

        let dense = writer.dense.with_added(&accepted)?;
        let table = Arc::new(current.chunks.with_added(&accepted));
        let sparse = self.write_sparse(&writer.sparse, &table, |s| s.add_chunks(&accepted))?;
        writer.dense = dense;
        let generation = self.publish(&writer, table, sparse);
        tracing::info!(accepted = report.accepted.len(), rejected = report.rejected.len(), generation, "ingested chunks");
        Ok(report)
    }

    fn validate(
        &self,
        chunk: &Chunk,
        table: &ChunkTable,
        batch_ids: &HashSet<ChunkId>,
        batch_files: &HashMap<(String, String), DocType>,
    ) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidChunk { id: chunk.id.clone(), reason: reason.to_string() };
        if chunk.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        if chunk.project_id.trim().is_empty() || chunk.file_id.trim().is_empty() {
            return Err(invalid("missing project or file id"));
        }
        if table.contains(&chunk.id) || batch_ids.contains(&chunk.id) {
            return Err(Error::DuplicateChunk(chunk.id.clone()));
        }
        let dim = self.settings.embedding.dimension;
        if chunk.embedding.len() != dim {
            return Err(Error::EmbeddingDimension { expected: dim, actual: chunk.embedding.len() });
        }
        if chunk.embedding.iter().any(|v| !v.is_finite()) {
            return Err(invalid("embedding has non-finite values"));
        }
        let known = table
            .file_doc_type(&chunk.project_id, &chunk.file_id)
            .or_else(|| batch_files.get(&(chunk.project_id.clone(), chunk.file_id.clone())).copied());
        if let Some(dt) = known.filter(|dt| *dt != chunk.doc_type) {
            return Err(invalid(&format!("file {} is already filed as {dt}", chunk.file_id)));
        }
        Ok(())
    }

    /// Stage a sparse change, persist the chunk table, then commit. Any
    /// failure before the commit rolls the staged change back.
    fn write_sparse<F>(&self, sparse: &SparseIndex, table: &ChunkTable, stage: F) -> Result<docqa_text::SparseSnapshot>
    where
        F: FnOnce(&SparseIndex) -> Result<()>,
    {
        let staged = stage(sparse).and_then(|()| match &self.chunks_path {
            Some(path) => table.save_jsonl(path),
            None => Ok(()),
        });
        if let Err(e) = staged {
            if let Err(rb) = sparse.rollback() {
                tracing::error!(error = %rb, "sparse rollback failed");
            }
            return Err(e);
        }
        sparse.commit()
    }

    /// Drop every chunk of one file. Returns how many were removed.
    pub fn remove_file(&self, project_id: &str, file_id: &str) -> Result<usize> {
        let removed = self.remove_where(|c| c.project_id == project_id && c.file_id == file_id)?;
        tracing::info!(project_id, file_id, removed, "removed file");
        Ok(removed)
    }

    pub fn remove_project(&self, project_id: &str) -> Result<usize> {
        let removed = self.remove_where(|c| c.project_id == project_id)?;
        tracing::info!(project_id, removed, "removed project");
        Ok(removed)
    }

    fn remove_where<F>(&self, remove: F) -> Result<usize>
    where
        F: Fn(&Chunk) -> bool,
    {
        let mut writer = self.lock_writer()?;
        let current = self.snapshot();
        let (table, removed) = current.chunks.without(remove);
        if removed.is_empty() {
            return Ok(0);
        }
        let table = Arc::new(table);
        let sparse = self.write_sparse(&writer.sparse, &table, |s| s.delete_chunks(&removed))?;
        let gone: HashSet<ChunkId> = removed.iter().cloned().collect();
        writer.dense = writer.dense.without(&gone);
        self.publish(&writer, table, sparse);
        Ok(removed.len())
    }

    pub async fn retrieve(
        &self,
        query: &str,
        embedding: &[f32],
        selection: &ScopeSelection,
        top_k: usize,
    ) -> Result<RetrievalResult> {
        self.retrieve_with_cancel(query, embedding, selection, top_k, &CancellationToken::new()).await
    }

    /// Reads exactly one snapshot for the whole query.
    pub async fn retrieve_with_cancel(
        &self,
        query: &str,
        embedding: &[f32],
        selection: &ScopeSelection,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult> {
        let snapshot = self.snapshot();
        let predicate = match &self.registry {
            Some(registry) => ScopeFilter::new(registry.as_ref()).resolve(selection)?,
            None => ScopeFilter::new(snapshot.chunks.as_ref()).resolve(selection)?,
        };
        tracing::debug!(generation = snapshot.generation, projects = predicate.projects().len(), "retrieve");
        self.pipeline.retrieve(&snapshot, predicate, query, embedding, top_k, cancel).await
    }
}
