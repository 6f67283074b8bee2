use candle_core::{DType, Device, Tensor};
use docqa_core::config::{EmbeddingBackend, RerankerBackend, Settings};
use docqa_core::{CrossEncoder, Embedder};
use docqa_embed::{default_cross_encoder, default_embedder, masked_mean_l2, resolve_model_dir};

fn offline_settings(dim: usize) -> Settings {
    let mut s = Settings::default();
    s.embedding.backend = EmbeddingBackend::Hash;
    s.embedding.dimension = dim;
    s.reranker.backend = RerankerBackend::Lexical;
    s
}

#[test]
fn configured_hash_backend_shapes_and_determinism() {
    let embedder = default_embedder(&offline_settings(128)).expect("embedder");
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    assert_eq!(embs[0].len(), 128);
    let norm: f32 = embs[0].iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    for (a, b) in embs[0].iter().zip(embs[1].iter()) {
        assert!((a - b).abs() <= 1e-6);
    }
    assert_eq!(embedder.embed("hello world").expect("embed"), embs[0]);
}

#[test]
fn configured_lexical_backend_scores_batches() {
    let ce = default_cross_encoder(&offline_settings(8)).expect("cross-encoder");
    let scores = ce.score_batch("steel grade", &["steel grade Q345", "timber"]).expect("scores");
    assert_eq!(scores.len(), 2);
    assert!(scores[0] > scores[1]);
}

#[test]
fn model_dir_prefers_configured_path() {
    let tmp = tempfile::tempdir().unwrap();
    let configured = tmp.path().to_string_lossy().to_string();
    let found = resolve_model_dir(Some(configured.as_str()), &[], &["does/not/exist"]).expect("resolve");
    assert_eq!(found, tmp.path());
    assert!(resolve_model_dir(None, &[], &["does/not/exist"]).is_err());
}

#[test]
fn masked_mean_l2_ignores_padding() {
    let dev = Device::Cpu;
    let h = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], (1, 2, 4), &dev).unwrap();
    let mask = Tensor::from_slice(&[1i64, 0i64], (1, 2), &dev).unwrap().to_dtype(DType::F32).unwrap();
    let out: Vec<Vec<f32>> = masked_mean_l2(&h, &mask).unwrap().to_vec2().unwrap();
    let norm: f32 = (1.0f32 + 4.0 + 9.0 + 16.0).sqrt();
    for (a, b) in out[0].iter().zip([1.0 / norm, 2.0 / norm, 3.0 / norm, 4.0 / norm]) {
        assert!((a - b).abs() < 1e-5, "a={a} b={b}");
    }
}
