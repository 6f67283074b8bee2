use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docqa_core::config::{EmbeddingBackend, RerankerBackend, Settings};
use docqa_core::{
    CancellationToken, Chunk, ChunkTable, CrossEncoder, Degradation, DenseReader, DocType, Embedder, Error, Hit,
    InMemoryRegistry, IndexKind, Predicate, ScopeFilter, ScopeSelection, SourceKind, SparseReader,
};
use docqa_embed::{HashEmbedder, LexicalCrossEncoder};
use docqa_hybrid::{HybridMerger, IndexSnapshot, KnowledgeBase, Pipeline};
use docqa_text::SparseIndex;

const DIM: usize = 32;

fn settings() -> Settings {
    let mut s = Settings::default();
    s.embedding.dimension = DIM;
    s.embedding.backend = EmbeddingBackend::Hash;
    s.reranker.backend = RerankerBackend::Lexical;
    s.retrieval.top_k = 5;
    s.retrieval.retry.base_backoff_ms = 1;
    s.retrieval.retry.max_backoff_ms = 2;
    s
}

fn embed(text: &str) -> Vec<f32> {
    HashEmbedder::new(DIM).embed(text).expect("embed")
}

fn chunk(id: &str, project: &str, doc_type: DocType, file: &str, text: &str) -> Chunk {
    Chunk {
        id: id.into(),
        project_id: project.into(),
        doc_type,
        file_id: file.into(),
        position: 0,
        text: text.into(),
        embedding: embed(text),
        page: None,
        section: None,
        context: None,
    }
}

fn lexical() -> Arc<dyn CrossEncoder> {
    Arc::new(LexicalCrossEncoder)
}

/// Two projects with a contract, a spec and a drawing each.
fn seeded() -> KnowledgeBase {
    let kb = KnowledgeBase::in_memory(settings(), lexical()).expect("kb");
    let mut chunks = Vec::new();
    for project in ["dam", "road"] {
        chunks.push(chunk(&format!("{project}-c1"), project, DocType::Contract, "contract.pdf", "payment terms and liquidated damages"));
        chunks.push(chunk(&format!("{project}-c2"), project, DocType::Contract, "contract.pdf", "termination for convenience clause"));
        chunks.push(chunk(&format!("{project}-s1"), project, DocType::Spec, "spec.pdf", "concrete strength grade C30 for the spillway"));
        chunks.push(chunk(&format!("{project}-s2"), project, DocType::Spec, "spec.pdf", "steel grade Q345 for gate frames"));
        chunks.push(chunk(&format!("{project}-d1"), project, DocType::Drawing, "plan.dwg", "spillway plan elevation and steel details"));
    }
    let report = kb.ingest(chunks).expect("ingest");
    assert!(report.is_clean());
    kb
}

struct DownDense {
    calls: AtomicUsize,
}

impl DenseReader for DownDense {
    fn dimension(&self) -> usize {
        DIM
    }

    fn len(&self) -> usize {
        0
    }

    fn search(&self, _: &[f32], _: &Predicate, _: usize, _: &CancellationToken) -> docqa_core::Result<Vec<Hit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::unavailable(IndexKind::Dense, "connection refused"))
    }
}

struct SlowEncoder(Duration);

impl CrossEncoder for SlowEncoder {
    fn score(&self, query: &str, passage: &str) -> anyhow::Result<f32> {
        std::thread::sleep(self.0);
        LexicalCrossEncoder.score(query, passage)
    }

    fn score_batch(&self, query: &str, passages: &[&str]) -> anyhow::Result<Vec<f32>> {
        std::thread::sleep(self.0);
        passages.iter().map(|p| LexicalCrossEncoder.score(query, p)).collect()
    }
}

#[test]
fn keyword_only_and_semantic_only_tie_breaks_by_id() {
    let merger = HybridMerger::new(0.5).unwrap();
    let fused = merger.fuse(&[Hit::new("A", 0.9)], &[Hit::new("B", 0.85)]);
    let ids: Vec<_> = fused.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!(fused[0].fused_score, 0.5);
    assert_eq!(fused[1].fused_score, 0.5);
    assert_eq!(fused[0].source, SourceKind::Sparse);
    assert_eq!(fused[1].source, SourceKind::Dense);
}

#[tokio::test]
async fn duplicate_in_batch_is_rejected_alone() {
    let kb = KnowledgeBase::in_memory(settings(), lexical()).expect("kb");
    kb.ingest(vec![chunk("existing", "dam", DocType::Spec, "old.pdf", "bridge deck waterproofing")]).expect("seed");

    let batch: Vec<Chunk> = (1..=10)
        .map(|i| {
            let id = if i == 7 { "existing".to_string() } else { format!("c{i}") };
            chunk(&id, "dam", DocType::Spec, "culverts.pdf", &format!("culvert section {i} headwall"))
        })
        .collect();
    let report = kb.ingest(batch).expect("ingest");
    assert_eq!(report.accepted.len(), 9);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, "existing");
    assert!(matches!(report.rejected[0].1, Error::DuplicateChunk(ref id) if id == "existing"));

    let sel = ScopeSelection::projects(["dam"]);
    let res = kb.retrieve("culvert headwall", &embed("culvert headwall"), &sel, 20).await.expect("retrieve");
    let ids = res.chunk_ids();
    for i in (1..=10).filter(|i| *i != 7) {
        assert!(ids.contains(&format!("c{i}").as_str()), "c{i} missing from {ids:?}");
    }
    let kept = kb.snapshot().chunks.get("existing").cloned().expect("original kept");
    assert_eq!(kept.text, "bridge deck waterproofing");
}

#[tokio::test]
async fn dense_outage_degrades_to_sparse_results() {
    let table = ChunkTable::from_chunks(
        [
            chunk("a", "dam", DocType::Spec, "spec.pdf", "grout curtain depth"),
            chunk("b", "dam", DocType::Spec, "spec.pdf", "grout mix ratio"),
            chunk("c", "dam", DocType::Spec, "spec.pdf", "formwork removal"),
        ]
        .into_iter()
        .map(Arc::new),
    );
    let sparse = SparseIndex::create_in_ram(50_000_000).expect("sparse");
    sparse.add_chunks(&table.iter().cloned().collect::<Vec<_>>()).expect("add");
    let dense = Arc::new(DownDense { calls: AtomicUsize::new(0) });
    let snapshot = IndexSnapshot {
        chunks: Arc::new(table),
        sparse: Arc::new(sparse.commit().expect("commit")),
        dense: dense.clone(),
        generation: 1,
    };
    let predicate = ScopeFilter::new(snapshot.chunks.as_ref()).resolve(&ScopeSelection::projects(["dam"])).unwrap();
    let pipeline = Pipeline::new(&settings().retrieval, lexical()).expect("pipeline");

    let res = pipeline
        .retrieve(&snapshot, predicate, "grout", &embed("grout"), 5, &CancellationToken::new())
        .await
        .expect("degraded, not failed");
    assert_eq!(res.degraded, vec![Degradation::DenseUnavailable]);
    assert_eq!(res.len(), 2);
    assert!(res.passages.iter().all(|p| p.candidate.source == SourceKind::Sparse));
    assert_eq!(dense.calls.load(Ordering::SeqCst), 3, "retried up to max_attempts");
}

#[tokio::test]
async fn rerank_timeout_returns_fused_order() {
    let mut s = settings();
    s.retrieval.rerank_timeout_ms = 50;
    let kb = KnowledgeBase::in_memory(s, Arc::new(SlowEncoder(Duration::from_millis(300)))).expect("kb");
    kb.ingest(vec![
        chunk("x1", "dam", DocType::Spec, "spec.pdf", "steel grade Q345"),
        chunk("x2", "dam", DocType::Spec, "spec.pdf", "steel bolts"),
        chunk("x3", "dam", DocType::Spec, "spec.pdf", "timber fence"),
    ])
    .expect("ingest");

    let res = kb
        .retrieve("steel grade", &embed("steel grade"), &ScopeSelection::projects(["dam"]), 2)
        .await
        .expect("retrieve");
    assert_eq!(res.degraded, vec![Degradation::RerankTimedOut]);
    assert_eq!(res.len(), 2);
    assert!(res.passages.iter().all(|p| p.candidate.rerank_score.is_none()));
    assert!(res.passages[0].candidate.fused_score >= res.passages[1].candidate.fused_score);
    assert_eq!(res.passages[0].score, res.passages[0].candidate.fused_score);
}

#[tokio::test]
async fn rerank_waits_for_a_permit_within_the_timeout() {
    let mut s = settings();
    s.retrieval.rerank_concurrency = 1;
    s.retrieval.rerank_timeout_ms = 700;
    let kb = KnowledgeBase::in_memory(s, Arc::new(SlowEncoder(Duration::from_millis(400)))).expect("kb");
    kb.ingest(vec![chunk("x1", "dam", DocType::Spec, "spec.pdf", "steel grade Q345")]).expect("ingest");
    let sel = ScopeSelection::projects(["dam"]);
    let q = embed("steel");

    let (a, b) = tokio::join!(kb.retrieve("steel", &q, &sel, 3), kb.retrieve("steel", &q, &sel, 3));
    let timed_out = [a.expect("a"), b.expect("b")]
        .iter()
        .filter(|r| r.degraded.contains(&Degradation::RerankTimedOut))
        .count();
    assert_eq!(timed_out, 1, "the second query queues behind the first and runs out of time");
}

#[tokio::test]
async fn cancellation_stops_the_query() {
    let kb = seeded();
    let sel = ScopeSelection::projects(["dam"]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = kb.retrieve_with_cancel("steel", &embed("steel"), &sel, 3, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    let kb = KnowledgeBase::in_memory(settings(), Arc::new(SlowEncoder(Duration::from_millis(500)))).expect("kb");
    kb.ingest(vec![chunk("x1", "dam", DocType::Spec, "spec.pdf", "steel grade Q345")]).expect("ingest");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = kb.retrieve_with_cancel("steel", &embed("steel"), &sel, 3, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn scope_is_enforced_on_both_indexes() {
    let kb = seeded();
    let broad = ScopeSelection::projects(["dam"]);
    let narrow = ScopeSelection::projects(["dam"]).with_doc_types([DocType::Spec]);
    let q = "steel grade spillway";

    let wide = kb.retrieve(q, &embed(q), &broad, 50).await.expect("broad");
    let tight = kb.retrieve(q, &embed(q), &narrow, 50).await.expect("narrow");
    assert!(wide.passages.iter().all(|p| p.chunk.project_id == "dam"));
    assert!(tight.passages.iter().all(|p| p.chunk.doc_type == DocType::Spec && p.chunk.project_id == "dam"));
    let wide_ids = wide.chunk_ids();
    assert!(tight.chunk_ids().iter().all(|id| wide_ids.contains(id)));
    assert!(!tight.is_empty());
}

#[tokio::test]
async fn invalid_scope_and_dimension_fail_fast() {
    let kb = seeded();
    let q = embed("steel");

    let err = kb.retrieve("steel", &q, &ScopeSelection::default(), 3).await.unwrap_err();
    assert!(matches!(err, Error::InvalidScope(_)));
    let err = kb.retrieve("steel", &q, &ScopeSelection::projects(["dam"]).with_files(["ghost.pdf"]), 3).await.unwrap_err();
    assert!(matches!(err, Error::InvalidScope(_)));
    let err = kb
        .retrieve("steel", &q, &ScopeSelection::projects(["dam"]).with_doc_types([DocType::Contract]).with_files(["spec.pdf"]), 3)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidScope(_)));

    let err = kb.retrieve("steel", &[0.1f32; 3], &ScopeSelection::projects(["dam"]), 3).await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingDimension { expected: DIM, actual: 3 }));
}

#[tokio::test]
async fn reranked_passages_come_back_best_first() {
    let kb = seeded();
    let q = "steel grade";
    let res = kb.retrieve(q, &embed(q), &ScopeSelection::projects(["road"]), 3).await.expect("retrieve");
    assert!(!res.is_degraded());
    assert!(res.len() <= 3);
    assert_eq!(res.passages[0].chunk.id, "road-s2");
    assert!(res.passages.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(res.passages.iter().all(|p| p.candidate.rerank_score == Some(p.score)));
}

#[tokio::test]
async fn unmatched_queries_give_empty_results() {
    let kb = seeded();
    let res = kb.retrieve("", &vec![0.0f32; DIM], &ScopeSelection::projects(["dam"]).with_files(["plan.dwg"]), 3).await;
    let res = res.expect("retrieve");
    assert!(res.passages.iter().all(|p| p.chunk.file_id == "plan.dwg"));

    let kb = KnowledgeBase::in_memory(settings(), lexical()).expect("kb");
    let registry = InMemoryRegistry::from_json(r#"{"dam":{"spec.pdf":{"tag":"spec"}}}"#).expect("registry");
    let kb = kb.with_registry(Arc::new(registry));
    let res = kb.retrieve("steel", &embed("steel"), &ScopeSelection::projects(["dam"]), 3).await.expect("retrieve");
    assert!(res.is_empty());
    assert!(!res.is_degraded());
}

#[test]
fn ingest_rejects_bad_chunks_individually() {
    let kb = seeded();
    let mut wrong_dim = chunk("w1", "dam", DocType::Spec, "spec.pdf", "x");
    wrong_dim.embedding = vec![0.5; 3];
    let mut nan = chunk("w2", "dam", DocType::Spec, "spec.pdf", "y");
    nan.embedding[0] = f32::NAN;
    let refiled = chunk("w3", "dam", DocType::Drawing, "spec.pdf", "z");
    let blank = chunk("  ", "dam", DocType::Spec, "spec.pdf", "blank");
    let ok = chunk("w4", "dam", DocType::Spec, "spec.pdf", "anchor bolts");

    let report = kb.ingest(vec![wrong_dim, nan, refiled, blank, ok]).expect("ingest");
    assert_eq!(report.accepted, vec!["w4".to_string()]);
    assert_eq!(report.rejected.len(), 4);
    assert!(matches!(report.rejected[0].1, Error::EmbeddingDimension { actual: 3, .. }));
    assert!(matches!(report.rejected[1].1, Error::InvalidChunk { .. }));
    assert!(matches!(report.rejected[2].1, Error::InvalidChunk { .. }));
    assert!(matches!(report.rejected[3].1, Error::InvalidChunk { .. }));
}

#[tokio::test]
async fn remove_file_hides_it_from_both_indexes() {
    let kb = seeded();
    let before = kb.stats();
    assert_eq!(kb.remove_file("dam", "spec.pdf").expect("remove"), 2);
    let after = kb.stats();
    assert_eq!(after.chunks, before.chunks - 2);
    assert_eq!(after.generation, before.generation + 1);

    let q = "steel grade concrete";
    let res = kb.retrieve(q, &embed(q), &ScopeSelection::projects(["dam"]), 50).await.expect("retrieve");
    assert!(res.passages.iter().all(|p| p.chunk.file_id != "spec.pdf"));
    assert!(!res.is_empty());

    let err = kb.retrieve(q, &embed(q), &ScopeSelection::projects(["dam"]).with_files(["spec.pdf"]), 5).await.unwrap_err();
    assert!(matches!(err, Error::InvalidScope(_)));

    assert_eq!(kb.remove_project("road").expect("remove"), 5);
    assert_eq!(kb.remove_project("road").expect("remove"), 0);
    assert_eq!(kb.stats().projects, 1);
}

#[tokio::test]
async fn readers_keep_their_snapshot_across_writes() {
    let kb = seeded();
    let held = kb.snapshot();
    kb.ingest(vec![chunk("late", "dam", DocType::Spec, "spec.pdf", "late addendum steel")]).expect("ingest");
    assert!(!held.chunks.contains("late"));
    assert_eq!(held.sparse.num_docs(), 10);
    assert_eq!(held.dense.len(), 10);
    let now = kb.snapshot();
    assert!(now.chunks.contains("late"));
    assert_eq!(now.sparse.num_docs(), 11);
    assert_eq!(now.generation, held.generation + 1);
}

#[tokio::test]
async fn persisted_base_reopens_and_rebuilds_sparse() {
    let tmp = tempfile::tempdir().expect("tmp");
    let mut s = settings();
    s.storage.data_dir = Some(tmp.path().to_string_lossy().to_string());
    {
        let kb = KnowledgeBase::open(s.clone(), lexical()).expect("open");
        kb.ingest(vec![
            chunk("p1", "dam", DocType::Spec, "spec.pdf", "riprap gradation"),
            chunk("p2", "dam", DocType::Contract, "contract.pdf", "retention money"),
        ])
        .expect("ingest");
    }
    let sel = ScopeSelection::projects(["dam"]);
    {
        let kb = KnowledgeBase::open(s.clone(), lexical()).expect("reopen");
        assert_eq!(kb.stats().chunks, 2);
        let res = kb.retrieve("riprap", &embed("riprap"), &sel, 1).await.expect("retrieve");
        assert_eq!(res.chunk_ids(), vec!["p1"]);
    }
    std::fs::remove_dir_all(tmp.path().join("tantivy")).expect("drop sparse index");
    let kb = KnowledgeBase::open(s, lexical()).expect("reopen after loss");
    assert_eq!(kb.snapshot().sparse.num_docs(), 2);
    let res = kb.retrieve("retention", &embed("retention"), &sel, 1).await.expect("retrieve");
    assert_eq!(res.chunk_ids(), vec!["p2"]);
}

#[test]
fn open_without_data_dir_is_a_config_error() {
    assert!(matches!(KnowledgeBase::open(settings(), lexical()), Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn child_hits_hand_back_their_parent_context() {
    let tmp = tempfile::tempdir().expect("tmp");
    let mut s = settings();
    s.storage.data_dir = Some(tmp.path().to_string_lossy().to_string());
    let parent = "Section 4. Materials. Cement shall be type II. Steel grade Q345 for gate frames.";
    let mut child = chunk("m1", "dam", DocType::Spec, "spec.pdf", "steel grade Q345 for gate frames");
    child.context = Some(parent.to_string());
    let plain = chunk("m2", "dam", DocType::Spec, "spec.pdf", "cement storage sheds");
    {
        let kb = KnowledgeBase::open(s.clone(), lexical()).expect("open");
        kb.ingest(vec![child, plain]).expect("ingest");
    }

    let kb = KnowledgeBase::open(s, lexical()).expect("reopen");
    let sel = ScopeSelection::projects(["dam"]);
    let res = kb.retrieve("steel grade", &embed("steel grade"), &sel, 2).await.expect("retrieve");
    assert_eq!(res.passages[0].chunk.id, "m1");
    assert_eq!(res.passages[0].context(), parent);
    assert_eq!(res.passages[0].candidate.source, SourceKind::Both);

    let res = kb.retrieve("type II", &embed("type II"), &sel, 2).await.expect("retrieve");
    assert!(res.passages.iter().all(|p| p.candidate.sparse_score.is_none()), "parent text is not indexed");
    let m2 = res.passages.iter().find(|p| p.chunk.id == "m2").expect("dense fills the pool");
    assert_eq!(m2.context(), "cement storage sheds");
}

#[tokio::test]
async fn chinese_queries_retrieve_and_rerank() {
    let kb = KnowledgeBase::in_memory(settings(), lexical()).expect("kb");
    kb.ingest(vec![
        chunk("z1", "dam", DocType::Spec, "spec.pdf", "大坝混凝土标号为C30，溢洪道采用C25。"),
        chunk("z2", "dam", DocType::Contract, "contract.pdf", "合同付款条款与违约金。"),
        chunk("z3", "dam", DocType::Spec, "spec.pdf", "溢洪道闸门钢材采用Q345。"),
    ])
    .expect("ingest");

    let q = "违约金";
    let res = kb.retrieve(q, &embed(q), &ScopeSelection::projects(["dam"]), 2).await.expect("retrieve");
    assert_eq!(res.passages[0].chunk.id, "z2");
    assert_eq!(res.passages[0].candidate.source, SourceKind::Both);
    assert_eq!(res.passages[0].candidate.rerank_score, Some(1.0));
    assert!(res.passages[1].score < 1.0);
}
