use anyhow::{bail, Context, Result};
use regex::Regex;
use std::time::Instant;
use tracing::info;

use candle_core::quantized::gguf_file;
use candle_core::Device;
use candle_transformers::models::{quantized_llama, quantized_qwen2};

use super::hub::HubCheckpoint;
use super::local::Weights;
use crate::models::WeightFormat;

/// 4-bit GGUF variants in order of preference. Q4_K keeps its per-block
/// scales quantized as well, the closest match to nf4 with double quantization.
const FOUR_BIT_SCHEMES: &[&str] = &["Q4_K_M", "Q4_K_S", "Q4_0"];

/// Picks the preferred pre-quantized 4-bit file among a repo's files.
pub fn select_four_bit_file(files: &[String]) -> Option<String> {
    FOUR_BIT_SCHEMES.iter().find_map(|scheme| {
        let re = Regex::new(&format!(r"(?i){}\.gguf$", scheme)).ok()?;
        files.iter().find(|f| re.is_match(f)).cloned()
    })
}

/// The 4-bit variant a file name advertises.
pub fn four_bit_scheme(file: &str) -> Option<&'static str> {
    let lower = file.to_lowercase();
    FOUR_BIT_SCHEMES
        .iter()
        .copied()
        .find(|scheme| lower.ends_with(&format!("{}.gguf", scheme.to_lowercase())))
}

pub struct GgufWeights {
    pub weights: Weights,
    pub format: WeightFormat,
    pub eos_token_id: Option<u32>,
}

/// Loads a GGUF file from the checkpoint with candle's quantized
/// implementation matching `general.architecture`.
pub fn load(checkpoint: &HubCheckpoint, file: &str, device: &Device) -> Result<GgufWeights> {
    let path = checkpoint.get(file)?;
    info!("Loading 4-bit weights from {:?}...", path);
    let start = Instant::now();

    let mut reader = std::fs::File::open(&path)?;
    let content = gguf_file::Content::read(&mut reader)
        .with_context(|| format!("reading GGUF header of {:?}", path))?;

    let architecture = content
        .metadata
        .get("general.architecture")
        .and_then(|v| v.to_string().ok())
        .cloned()
        .unwrap_or_else(|| "llama".to_string());
    let eos_token_id = content
        .metadata
        .get("tokenizer.ggml.eos_token_id")
        .and_then(|v| v.to_u32().ok());

    let weights = match architecture.as_str() {
        "llama" | "mistral" => Weights::QuantizedLlama(quantized_llama::ModelWeights::from_gguf(
            content,
            &mut reader,
            device,
        )?),
        "qwen2" => Weights::QuantizedQwen2(quantized_qwen2::ModelWeights::from_gguf(
            content,
            &mut reader,
            device,
        )?),
        other => bail!("unsupported GGUF architecture '{}' in {}", other, file),
    };

    info!("4-bit weights loaded in {:.2?}", start.elapsed());
    Ok(GgufWeights {
        weights,
        format: WeightFormat::Quantized {
            bits: 4,
            scheme: four_bit_scheme(file).unwrap_or("gguf").to_string(),
        },
        eos_token_id,
    })
}
