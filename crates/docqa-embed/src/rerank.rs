use anyhow::{anyhow, Result};
use std::path::Path;

use candle_core::{Device, D};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaForSequenceClassification};
use tokenizers::{Tokenizer, TruncationParams, TruncationStrategy};

use docqa_core::CrossEncoder;

use crate::device::select_device;
use crate::embedding::load_weights;
use crate::pool::sigmoid;
use crate::tokenize::tokenize_pairs_on_device;

/// Passages scored per forward pass.
const BATCH: usize = 16;

/// BGE reranker: XLM-RoBERTa sequence classifier over `(query, passage)`
/// pairs with one relevance logit, squashed to (0, 1).
pub struct BgeReranker {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
}

impl BgeReranker {
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = select_device();
        tracing::info!(dir = %model_dir.display(), max_len, "loading BGE reranker");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_len,
                strategy: TruncationStrategy::LongestFirst,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Invalid truncation settings: {}", e))?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let vb = load_weights(model_dir, &device)?;
        let model = XLMRobertaForSequenceClassification::new(1, &config, vb)?;
        Ok(Self { model, tokenizer, device, max_len })
    }
}

impl CrossEncoder for BgeReranker {
    fn score(&self, query: &str, passage: &str) -> Result<f32> {
        self.score_batch(query, &[passage])?
            .pop()
            .ok_or_else(|| anyhow!("reranker returned no score"))
    }

    fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(passages.len());
        for group in passages.chunks(BATCH) {
            let batch = tokenize_pairs_on_device(&self.tokenizer, query, group, self.max_len, &self.device)?;
            let logits = self.model.forward(&batch.input_ids, &batch.attention_mask, &batch.token_type_ids)?;
            let probs = sigmoid(&logits.squeeze(D::Minus1)?)?;
            scores.extend(probs.to_device(&Device::Cpu)?.to_vec1::<f32>()?);
        }
        Ok(scores)
    }
}
