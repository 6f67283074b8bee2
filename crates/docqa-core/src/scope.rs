//! Scope cascade: projects → document types → files.
//!
//! A [`ScopeSelection`] is the caller's immutable request. [`ScopeFilter::resolve`]
//! validates it against a [`MetadataRegistry`] and yields the [`Predicate`] that
//! both indexes apply for the whole query.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::registry::MetadataRegistry;
use crate::types::{Chunk, DocType};

/// Empty `doc_types` / `file_ids` mean no restriction at that level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSelection {
    pub project_ids: BTreeSet<String>,
    pub doc_types: BTreeSet<DocType>,
    pub file_ids: BTreeSet<String>,
}

impl ScopeSelection {
    pub fn projects<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { project_ids: ids.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    pub fn with_doc_types<I: IntoIterator<Item = DocType>>(mut self, doc_types: I) -> Self {
        self.doc_types = doc_types.into_iter().collect();
        self
    }

    pub fn with_files<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_ids = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Resolved, validated scope. Cheap to clone and evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    projects: BTreeSet<String>,
    doc_types: BTreeSet<DocType>,
    file_ids: BTreeSet<String>,
}

impl Predicate {
    pub fn projects(&self) -> &BTreeSet<String> {
        &self.projects
    }

    /// `None` when every document type is in scope.
    pub fn doc_types(&self) -> Option<&BTreeSet<DocType>> {
        (!self.doc_types.is_empty()).then_some(&self.doc_types)
    }

    /// `None` when every file of the selected projects is in scope.
    pub fn file_ids(&self) -> Option<&BTreeSet<String>> {
        (!self.file_ids.is_empty()).then_some(&self.file_ids)
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.matches_parts(&chunk.project_id, chunk.doc_type, &chunk.file_id)
    }

    pub fn matches_parts(&self, project_id: &str, doc_type: DocType, file_id: &str) -> bool {
        self.projects.contains(project_id)
            && (self.doc_types.is_empty() || self.doc_types.contains(&doc_type))
            && (self.file_ids.is_empty() || self.file_ids.contains(file_id))
    }
}

pub struct ScopeFilter<'a> {
    registry: &'a dyn MetadataRegistry,
}

impl<'a> ScopeFilter<'a> {
    pub fn new(registry: &'a dyn MetadataRegistry) -> Self {
        Self { registry }
    }

    /// Validate `selection` and turn it into a predicate. Pure: reads the
    /// registry, never writes.
    pub fn resolve(&self, selection: &ScopeSelection) -> Result<Predicate> {
        if selection.project_ids.is_empty() {
            return Err(Error::InvalidScope("at least one project must be selected".into()));
        }

        let known = self.registry.list_projects();
        if let Some(unknown) = selection.project_ids.iter().find(|p| !known.contains(*p)) {
            return Err(Error::InvalidScope(format!("unknown project '{unknown}'")));
        }

        for file_id in &selection.file_ids {
            let found: Vec<DocType> = selection
                .project_ids
                .iter()
                .filter_map(|p| self.registry.locate_file(p, file_id))
                .collect();
            if found.is_empty() {
                return Err(Error::InvalidScope(format!(
                    "file '{file_id}' does not belong to the selected projects"
                )));
            }
            if !selection.doc_types.is_empty()
                && !found.iter().any(|dt| selection.doc_types.contains(dt))
            {
                return Err(Error::InvalidScope(format!(
                    "file '{file_id}' is outside the selected document types"
                )));
            }
        }

        Ok(Predicate {
            projects: selection.project_ids.clone(),
            doc_types: selection.doc_types.clone(),
            file_ids: selection.file_ids.clone(),
        })
    }
}
