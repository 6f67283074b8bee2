//! Project / document-type / file bookkeeping consulted by the scope filter.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::types::DocType;

/// Read-only view of the project → document type → file cascade.
pub trait MetadataRegistry: Send + Sync {
    fn list_projects(&self) -> BTreeSet<String>;
    fn list_doc_types(&self, project_id: &str) -> BTreeSet<DocType>;
    fn list_files(&self, project_id: &str, doc_type: DocType) -> BTreeSet<String>;

    /// Document type a file was registered under in `project_id`, if any.
    fn locate_file(&self, project_id: &str, file_id: &str) -> Option<DocType> {
        self.list_doc_types(project_id)
            .into_iter()
            .find(|dt| self.list_files(project_id, *dt).contains(file_id))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FileEntry {
    tag: DocType,
}

/// Registry held in memory, loadable from the file manager's JSON layout
/// `{project: {file: {"tag": doc_type}}}`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    projects: BTreeMap<String, BTreeMap<String, DocType>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_project(&mut self, project_id: impl Into<String>) {
        self.projects.entry(project_id.into()).or_default();
    }

    pub fn register_file(
        &mut self,
        project_id: impl Into<String>,
        file_id: impl Into<String>,
        doc_type: DocType,
    ) {
        self.projects
            .entry(project_id.into())
            .or_default()
            .insert(file_id.into(), doc_type);
    }

    pub fn remove_file(&mut self, project_id: &str, file_id: &str) -> bool {
        self.projects
            .get_mut(project_id)
            .map(|files| files.remove(file_id).is_some())
            .unwrap_or(false)
    }

    pub fn remove_project(&mut self, project_id: &str) -> bool {
        self.projects.remove(project_id).is_some()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, BTreeMap<String, FileEntry>> = serde_json::from_str(json)?;
        let projects = raw
            .into_iter()
            .map(|(p, files)| (p, files.into_iter().map(|(f, e)| (f, e.tag)).collect()))
            .collect();
        Ok(Self { projects })
    }

    pub fn to_json(&self) -> Result<String> {
        let raw: BTreeMap<&str, BTreeMap<&str, FileEntry>> = self
            .projects
            .iter()
            .map(|(p, files)| {
                let files = files
                    .iter()
                    .map(|(f, tag)| (f.as_str(), FileEntry { tag: *tag }))
                    .collect();
                (p.as_str(), files)
            })
            .collect();
        Ok(serde_json::to_string_pretty(&raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(self.to_json()?.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl MetadataRegistry for InMemoryRegistry {
    fn list_projects(&self) -> BTreeSet<String> {
        self.projects.keys().cloned().collect()
    }

    fn list_doc_types(&self, project_id: &str) -> BTreeSet<DocType> {
        self.projects
            .get(project_id)
            .map(|files| files.values().copied().collect())
            .unwrap_or_default()
    }

    fn list_files(&self, project_id: &str, doc_type: DocType) -> BTreeSet<String> {
        self.projects
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
        self.projects.get(project_id)?.get(file_id).copied()
    }
}
