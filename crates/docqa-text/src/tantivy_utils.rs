use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use std::ops::Range;

use tantivy::tokenizer::{LowerCaser, StopWordFilter, TextAnalyzer, Token, TokenStream, Tokenizer};
use tantivy::Index;

use docqa_core::analysis::term_spans;
use docqa_core::{Error, Result};

pub const TOKENIZER: &str = "text_with_stopwords";

/// Field handles of the chunk schema.
#[derive(Debug, Clone, Copy)]
pub struct ChunkFields {
	pub id: Field,
	pub project: Field,
	pub doc_type: Field,
	pub file: Field,
	pub text: Field,
}

impl ChunkFields {
	pub fn from_schema(schema: &Schema) -> Result<Self> {
		let get = |name: &str| schema.get_field(name).map_err(|e| Error::Index(e.to_string()));
		Ok(Self { id: get("id")?, project: get("project")?, doc_type: get("doc_type")?, file: get("file")?, text: get("text")? })
	}
}

/// Scope columns are raw `STRING` terms so the filter matches ids exactly;
/// only `text` goes through the analyzer.
pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("id", STRING | STORED);
	schema_builder.add_text_field("project", STRING);
	schema_builder.add_text_field("doc_type", STRING);
	schema_builder.add_text_field("file", STRING);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing);
	schema_builder.add_text_field("text", text_options);
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let stop_words = vec![
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	let tokenizer = TextAnalyzer::builder(SegmentingTokenizer)
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TOKENIZER, tokenizer);
}

/// Word-boundary tokenizer that emits CJK runs as character bigrams.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentingTokenizer;

pub struct SegmentingTokenStream<'a> {
	text: &'a str,
	spans: std::vec::IntoIter<Range<usize>>,
	token: Token,
}

impl Tokenizer for SegmentingTokenizer {
	type TokenStream<'a> = SegmentingTokenStream<'a>;

	fn token_stream<'a>(&'a mut self, text: &'a str) -> SegmentingTokenStream<'a> {
		SegmentingTokenStream { text, spans: term_spans(text).into_iter(), token: Token::default() }
	}
}

impl TokenStream for SegmentingTokenStream<'_> {
	fn advance(&mut self) -> bool {
		let Some(span) = self.spans.next() else {
			return false;
		};
		self.token.position = self.token.position.wrapping_add(1);
		self.token.offset_from = span.start;
		self.token.offset_to = span.end;
		self.token.text.clear();
		self.token.text.push_str(&self.text[span]);
		true
	}

	fn token(&self) -> &Token {
		&self.token
	}

	fn token_mut(&mut self) -> &mut Token {
		&mut self.token
	}
}

pub(crate) fn index_err(e: tantivy::TantivyError) -> Error {
	Error::Index(e.to_string())
}
