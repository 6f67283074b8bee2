use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tantivy::directory::MmapDirectory;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use docqa_core::{Chunk, ChunkId, Error, Result};

use crate::search::SparseSnapshot;
use crate::tantivy_utils::{build_schema, index_err, register_tokenizer, ChunkFields};

/// Writable side of the sparse index.
///
/// Added and deleted documents stay invisible until [`SparseIndex::commit`],
/// which returns the next frozen [`SparseSnapshot`].
pub struct SparseIndex {
	index: Index,
	writer: Mutex<IndexWriter<TantivyDocument>>,
	reader: IndexReader,
	fields: ChunkFields,
}

impl SparseIndex {
	pub fn create_in_ram(writer_memory_bytes: usize) -> Result<Self> {
		Self::from_index(Index::create_in_ram(build_schema()), writer_memory_bytes)
	}

	pub fn open(index_dir: &Path, writer_memory_bytes: usize) -> Result<Self> {
		std::fs::create_dir_all(index_dir)?;
		let dir = MmapDirectory::open(index_dir).map_err(|e| Error::Index(e.to_string()))?;
		let index = Index::open_or_create(dir, build_schema()).map_err(index_err)?;
		Self::from_index(index, writer_memory_bytes)
	}

	fn from_index(index: Index, writer_memory_bytes: usize) -> Result<Self> {
		register_tokenizer(&index);
		let fields = ChunkFields::from_schema(&index.schema())?;
		let writer = index.writer(writer_memory_bytes).map_err(index_err)?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(index_err)?;
		Ok(Self { index, writer: Mutex::new(writer), reader, fields })
	}

	fn writer(&self) -> Result<MutexGuard<'_, IndexWriter<TantivyDocument>>> {
		self.writer.lock().map_err(|_| Error::Index("sparse index writer lock poisoned".into()))
	}

	pub fn add_chunks(&self, chunks: &[Arc<Chunk>]) -> Result<()> {
		let writer = self.writer()?;
		for c in chunks {
			let doc = doc!(
				self.fields.id => c.id.clone(),
				self.fields.project => c.project_id.clone(),
				self.fields.doc_type => c.doc_type.as_str(),
				self.fields.file => c.file_id.clone(),
				self.fields.text => c.text.clone(),
			);
			writer.add_document(doc).map_err(index_err)?;
		}
		Ok(())
	}

	pub fn delete_chunks(&self, ids: &[ChunkId]) -> Result<()> {
		let writer = self.writer()?;
		for id in ids {
			writer.delete_term(Term::from_field_text(self.fields.id, id));
		}
		Ok(())
	}

	pub fn clear(&self) -> Result<()> {
		self.writer()?.delete_all_documents().map_err(index_err)?;
		Ok(())
	}

	/// Make pending changes durable and visible, returning the new version.
	pub fn commit(&self) -> Result<SparseSnapshot> {
		self.writer()?.commit().map_err(index_err)?;
		self.reader.reload().map_err(index_err)?;
		Ok(self.snapshot())
	}

	/// Drop changes made since the last commit.
	pub fn rollback(&self) -> Result<()> {
		self.writer()?.rollback().map_err(index_err)?;
		Ok(())
	}

	/// The last committed version.
	pub fn snapshot(&self) -> SparseSnapshot {
		SparseSnapshot::new(self.index.clone(), self.reader.searcher(), self.fields)
	}
}
