use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::{Encoding, Tokenizer};

/// Pad id used by XLM-RoBERTa vocabularies.
const PAD_ID: u32 = 1;

/// Encoded batch on `device`: `(input_ids, attention_mask, token_type_ids)`,
/// each `[B, max_len]`.
pub struct EncodedBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
}

fn pad_row(enc: &Encoding, max_len: usize, ids: &mut Vec<u32>, mask: &mut Vec<u32>, types: &mut Vec<u32>) {
    let take = enc.get_ids().len().min(max_len);
    ids.extend_from_slice(&enc.get_ids()[..take]);
    mask.extend_from_slice(&enc.get_attention_mask()[..take]);
    types.extend_from_slice(&enc.get_type_ids()[..take]);
    let pad = max_len - take;
    ids.extend(std::iter::repeat(PAD_ID).take(pad));
    mask.extend(std::iter::repeat(0).take(pad));
    types.extend(std::iter::repeat(0).take(pad));
}

fn to_batch(encodings: &[Encoding], max_len: usize, device: &Device) -> Result<EncodedBatch> {
    let rows = encodings.len();
    let (mut ids, mut mask, mut types) = (Vec::new(), Vec::new(), Vec::new());
    for enc in encodings {
        pad_row(enc, max_len, &mut ids, &mut mask, &mut types);
    }
    Ok(EncodedBatch {
        input_ids: Tensor::from_vec(ids, (rows, max_len), device)?,
        attention_mask: Tensor::from_vec(mask, (rows, max_len), device)?,
        token_type_ids: Tensor::from_vec(types, (rows, max_len), device)?,
    })
}

pub fn tokenize_on_device(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<EncodedBatch> {
    let encodings = texts
        .iter()
        .map(|t| tokenizer.encode(t.as_str(), true))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    to_batch(&encodings, max_len, device)
}

/// Encode `(query, passage)` pairs the way cross-encoders expect them.
pub fn tokenize_pairs_on_device(tokenizer: &Tokenizer, query: &str, passages: &[&str], max_len: usize, device: &Device) -> Result<EncodedBatch> {
    let encodings = passages
        .iter()
        .map(|p| tokenizer.encode((query, *p), true))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    to_batch(&encodings, max_len, device)
}
