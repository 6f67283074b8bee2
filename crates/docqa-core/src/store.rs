//! Immutable chunk table: the durable `chunk id → chunk` mapping.
//!
//! Writers derive a new table from the current one and publish it; readers
//! keep whichever `Arc<ChunkTable>` they started with.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::MetadataRegistry;
use crate::types::{Chunk, ChunkId, DocType};

#[derive(Debug, Clone, Default)]
pub struct ChunkTable {
    chunks: BTreeMap<ChunkId, Arc<Chunk>>,
    // project -> file -> doc type, derived from the chunks
    catalog: BTreeMap<String, BTreeMap<String, DocType>>,
}

impl ChunkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks<I: IntoIterator<Item = Arc<Chunk>>>(chunks: I) -> Self {
        let mut table = Self::new();
        for chunk in chunks {
            table.insert(chunk);
        }
        table
    }

    fn insert(&mut self, chunk: Arc<Chunk>) {
        self.catalog
            .entry(chunk.project_id.clone())
            .or_default()
            .insert(chunk.file_id.clone(), chunk.doc_type);
        self.chunks.insert(chunk.id.clone(), chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Chunk>> {
        self.chunks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.chunks.contains_key(id)
    }

    /// Chunks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Chunk>> {
        self.chunks.values()
    }

    pub fn project_count(&self) -> usize {
        self.catalog.len()
    }

    pub fn file_count(&self) -> usize {
        self.catalog.values().map(BTreeMap::len).sum()
    }

    /// Document type already recorded for a file, if the file has chunks.
    pub fn file_doc_type(&self, project_id: &str, file_id: &str) -> Option<DocType> {
        self.catalog.get(project_id)?.get(file_id).copied()
    }

    /// New table with `added` inserted. Callers reject duplicates beforehand.
    pub fn with_added(&self, added: &[Arc<Chunk>]) -> Self {
        let mut next = self.clone();
        for chunk in added {
            next.insert(Arc::clone(chunk));
        }
        next
    }

    /// New table without the chunks matching `remove`, plus the removed ids.
    pub fn without<F>(&self, remove: F) -> (Self, Vec<ChunkId>)
    where
        F: Fn(&Chunk) -> bool,
    {
        let (gone, kept): (Vec<_>, Vec<_>) = self.chunks.values().cloned().partition(|c| remove(c));
        let removed = gone.into_iter().map(|c| c.id.clone()).collect();
        (Self::from_chunks(kept), removed)
    }

    /// Read a JSON-lines file. A missing file is an empty table.
    pub fn load_jsonl(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut table = Self::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(&line).map_err(|e| {
                Error::Storage(format!("{}:{}: {}", path.display(), lineno + 1, e))
            })?;
            if table.contains(&chunk.id) {
                return Err(Error::Storage(format!(
                    "{}: duplicate chunk id '{}'",
                    path.display(),
                    chunk.id
                )));
            }
            table.insert(Arc::new(chunk));
        }
        Ok(table)
    }

    /// Write the whole table to a temp file beside `path`, then rename over it.
    pub fn save_jsonl(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut w = BufWriter::new(tmp.as_file());
            for chunk in self.chunks.values() {
                serde_json::to_writer(&mut w, chunk.as_ref())?;
                w.write_all(b"\n")?;
            }
            w.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl MetadataRegistry for ChunkTable {
    fn list_projects(&self) -> BTreeSet<String> {
        self.catalog.keys().cloned().collect()
    }

    fn list_doc_types(&self, project_id: &str) -> BTreeSet<DocType> {
        self.catalog
            .get(project_id)
            .map(|files| files.values().copied().collect())
            .unwrap_or_default()
    }

    fn list_files(&self, project_id: &str, doc_type: DocType) -> BTreeSet<String> {
        self.catalog
            .get(project_id)
            .map(|files| {
                files
                    .iter()
                    .filter(|(_, dt)| **dt == doc_type)
                    .map(|(f, _)| f.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn locate_file(&self, project_id: &str, file_id: &str) -> Option<DocType> {
        self.file_doc_type(project_id, file_id)
    }
}
