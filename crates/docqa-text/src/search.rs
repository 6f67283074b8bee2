//! Scoped BM25 search over one frozen tantivy searcher.
//!
//! Tantivy normally takes BM25 statistics (document count, average field
//! length, document frequency) from the whole index. [`ScopedStatistics`]
//! recomputes them over the documents that satisfy the scope predicate, so a
//! term that is common inside the selected projects scores low even when it is
//! rare across the rest of the index.
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::{Bm25StatisticsProvider, BooleanQuery, ConstScoreQuery, Occur, Query, QueryClone, QueryParser, TermQuery, TermSetQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{DocAddress, Index, Searcher, TantivyDocument, Term};
use tokio_util::sync::CancellationToken;

use docqa_core::analysis::spread_cjk;
use docqa_core::{Error, Hit, Predicate, Result, SparseReader};

use crate::tantivy_utils::{index_err, ChunkFields};

const CANCEL_CHECK_EVERY: usize = 1024;

/// A published version of the sparse index. Cloning shares the searcher.
#[derive(Clone)]
pub struct SparseSnapshot {
	index: Index,
	searcher: Searcher,
	fields: ChunkFields,
}

impl SparseSnapshot {
	pub(crate) fn new(index: Index, searcher: Searcher, fields: ChunkFields) -> Self {
		Self { index, searcher, fields }
	}

	/// Non-scoring query selecting exactly the documents `predicate` accepts.
	fn scope_query(&self, predicate: &Predicate) -> Box<dyn Query> {
		let mut clauses: Vec<Box<dyn Query>> = Vec::with_capacity(3);
		clauses.push(Box::new(TermSetQuery::new(
			predicate.projects().iter().map(|p| Term::from_field_text(self.fields.project, p)),
		)));
		if let Some(doc_types) = predicate.doc_types() {
			clauses.push(Box::new(TermSetQuery::new(
				doc_types.iter().map(|dt| Term::from_field_text(self.fields.doc_type, dt.as_str())),
			)));
		}
		if let Some(files) = predicate.file_ids() {
			clauses.push(Box::new(TermSetQuery::new(
				files.iter().map(|f| Term::from_field_text(self.fields.file, f)),
			)));
		}
		Box::new(BooleanQuery::intersection(clauses))
	}

	fn stored_id(&self, addr: DocAddress) -> Result<String> {
		let doc: TantivyDocument = self.searcher.doc(addr).map_err(index_err)?;
		doc.get_first(self.fields.id)
			.and_then(|v| v.as_str())
			.map(str::to_string)
			.ok_or_else(|| Error::Index(format!("document {addr:?} has no stored id")))
	}
}

impl SparseReader for SparseSnapshot {
	fn num_docs(&self) -> u64 {
		self.searcher.num_docs()
	}

	fn search(&self, query: &str, predicate: &Predicate, limit: usize, cancel: &CancellationToken) -> Result<Vec<Hit>> {
		if limit == 0 || query.trim().is_empty() {
			return Ok(Vec::new());
		}
		let scope = self.scope_query(predicate);
		let stats = ScopedStatistics::compute(&self.searcher, scope.as_ref(), self.fields.text, cancel)?;
		if stats.num_docs == 0 {
			return Ok(Vec::new());
		}

		let qp = QueryParser::for_index(&self.index, vec![self.fields.text]);
		let (text_query, errors) = qp.parse_query_lenient(&spread_cjk(query));
		if !errors.is_empty() {
			tracing::debug!(query, errors = errors.len(), "lenient query parse dropped clauses");
		}
		let filter: Box<dyn Query> = Box::new(ConstScoreQuery::new(scope.box_clone(), 0.0));
		let full = BooleanQuery::new(vec![(Occur::Must, text_query), (Occur::Must, filter)]);

		let top_docs = self
			.searcher
			.search_with_statistics_provider(&full, &TopDocs::with_limit(limit), &stats)
			.map_err(|e| if cancel.is_cancelled() { Error::Cancelled } else { index_err(e) })?;
		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			hits.push(Hit { id: self.stored_id(addr)?, score });
		}
		tracing::trace!(hits = hits.len(), scoped_docs = stats.num_docs, "sparse search");
		Ok(hits)
	}
}

/// BM25 statistics restricted to a scope query.
pub struct ScopedStatistics<'a> {
	searcher: &'a Searcher,
	scope: &'a dyn Query,
	text_field: Field,
	cancel: &'a CancellationToken,
	pub num_docs: u64,
	pub num_tokens: u64,
}

impl<'a> ScopedStatistics<'a> {
	pub fn compute(searcher: &'a Searcher, scope: &'a dyn Query, text_field: Field, cancel: &'a CancellationToken) -> Result<Self> {
		let docs = searcher.search(scope, &DocSetCollector).map_err(index_err)?;
		let mut num_tokens = 0u64;
		let mut fieldnorms = std::collections::HashMap::new();
		for (i, addr) in docs.iter().enumerate() {
			if i % CANCEL_CHECK_EVERY == 0 && cancel.is_cancelled() {
				return Err(Error::Cancelled);
			}
			if !fieldnorms.contains_key(&addr.segment_ord) {
				let reader = searcher.segment_reader(addr.segment_ord).get_fieldnorms_reader(text_field).map_err(index_err)?;
				fieldnorms.insert(addr.segment_ord, reader);
			}
			if let Some(reader) = fieldnorms.get(&addr.segment_ord) {
				num_tokens += u64::from(reader.fieldnorm(addr.doc_id));
			}
		}
		Ok(Self { searcher, scope, text_field, cancel, num_docs: docs.len() as u64, num_tokens })
	}
}

impl Bm25StatisticsProvider for ScopedStatistics<'_> {
	fn total_num_tokens(&self, field: Field) -> tantivy::Result<u64> {
		if field == self.text_field {
			Ok(self.num_tokens.max(1))
		} else {
			Ok(self.num_docs)
		}
	}

	fn total_num_docs(&self) -> tantivy::Result<u64> {
		Ok(self.num_docs)
	}

	fn doc_freq(&self, term: &Term) -> tantivy::Result<u64> {
		if self.cancel.is_cancelled() {
			return Err(tantivy::TantivyError::InternalError("search cancelled".into()));
		}
		if term.field() != self.text_field {
			return Ok(self.num_docs);
		}
		let term_query: Box<dyn Query> = Box::new(TermQuery::new(term.clone(), IndexRecordOption::Basic));
		let scoped_term = BooleanQuery::new(vec![(Occur::Must, self.scope.box_clone()), (Occur::Must, term_query)]);
		let n = self.searcher.search(&scoped_term, &Count)?;
		Ok(n as u64)
	}
}
