use std::fs;
use std::sync::Arc;

use docqa_core::{Chunk, ChunkTable, DocType, Error, MetadataRegistry, ScopeFilter, ScopeSelection};
use tempfile::TempDir;

fn chunk(id: &str, project: &str, doc_type: DocType, file: &str) -> Arc<Chunk> {
    Arc::new(Chunk {
        id: id.into(),
        project_id: project.into(),
        doc_type,
        file_id: file.into(),
        position: 0,
        text: format!("text of {id}"),
        embedding: vec![1.0, 0.0],
        page: Some(3),
        section: Some("General".into()),
        context: None,
    })
}

fn table() -> ChunkTable {
    ChunkTable::from_chunks([
        chunk("a", "dam", DocType::Contract, "c.pdf"),
        chunk("b", "dam", DocType::Spec, "s.pdf"),
        chunk("c", "road", DocType::Drawing, "d.dwg"),
    ])
}

#[test]
fn chunk_table_acts_as_registry() {
    let t = table();
    assert_eq!(t.list_projects().len(), 2);
    assert_eq!(
        t.list_doc_types("dam").into_iter().collect::<Vec<_>>(),
        vec![DocType::Spec, DocType::Contract]
    );
    assert!(t.list_files("road", DocType::Drawing).contains("d.dwg"));
    assert_eq!(t.locate_file("dam", "d.dwg"), None);
}

#[test]
fn scope_filter_resolves_against_chunk_catalog() {
    let t = table();
    let filter = ScopeFilter::new(&t);
    let pred = filter
        .resolve(&ScopeSelection::projects(["dam"]).with_files(["s.pdf"]))
        .expect("valid scope");
    let hits: Vec<_> = t.iter().filter(|c| pred.matches(c)).map(|c| c.id.as_str()).collect();
    assert_eq!(hits, vec!["b"]);

    let err = filter
        .resolve(&ScopeSelection::projects(["dam"]).with_files(["d.dwg"]))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidScope(_)));
}

#[test]
fn without_removes_a_file_and_its_catalog_entry() {
    let t = table();
    let (next, removed) = t.without(|c| c.project_id == "dam" && c.file_id == "c.pdf");
    assert_eq!(removed, vec!["a".to_string()]);
    assert_eq!(next.len(), 2);
    assert_eq!(t.len(), 3, "original table is untouched");
    assert!(next.locate_file("dam", "c.pdf").is_none());
}

#[test]
fn jsonl_persistence_round_trip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("store").join("chunks.jsonl");
    let t = table();
    t.save_jsonl(&path).expect("save");

    let back = ChunkTable::load_jsonl(&path).expect("load");
    assert_eq!(back.len(), 3);
    assert_eq!(back.get("b").map(|c| c.section.clone()), Some(Some("General".into())));
    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
}

#[test]
fn missing_store_file_is_empty() {
    let tmp = TempDir::new().unwrap();
    let back = ChunkTable::load_jsonl(&tmp.path().join("nope.jsonl")).expect("load");
    assert!(back.is_empty());
}

#[test]
fn corrupt_line_is_a_storage_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("chunks.jsonl");
    fs::write(&path, "{not json}\n").unwrap();
    assert!(matches!(ChunkTable::load_jsonl(&path), Err(Error::Storage(_))));
}
