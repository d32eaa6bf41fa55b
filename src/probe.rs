//! Startup detection of the heavy capabilities.
//!
//! Each capability is attempted on its own; a failure or panic in one
//! attempt is recorded as `false` and never stops the others.

use anyhow::Result;
use std::panic::{self, UnwindSafe};
use tracing::debug;

use crate::models::{Capability, CapabilityRecord};

pub trait CapabilityProbe {
    fn probe(&self) -> CapabilityRecord;
}

/// Probes the capabilities compiled into this binary against the current host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl CapabilityProbe for SystemProbe {
    fn probe(&self) -> CapabilityRecord {
        let record = CapabilityRecord {
            has_tensor_runtime: attempt(Capability::TensorRuntime, checks::tensor_runtime),
            has_model_loading: attempt(Capability::ModelLoading, checks::model_loading),
            has_quantization_support: attempt(Capability::Quantization, checks::quantization),
        };
        debug!("Capability probe: {:?}", record);
        record
    }
}

/// A probe with a fixed answer, for forcing a code path.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub CapabilityRecord);

impl CapabilityProbe for StaticProbe {
    fn probe(&self) -> CapabilityRecord {
        self.0
    }
}

/// Runs one acquisition attempt, converting errors and panics into `false`.
pub fn attempt<F>(capability: Capability, check: F) -> bool
where
    F: FnOnce() -> Result<()> + UnwindSafe,
{
    match panic::catch_unwind(check) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("{} unavailable: {:#}", capability, e);
            false
        }
        Err(_) => {
            debug!("{} unavailable: probe panicked", capability);
            false
        }
    }
}

#[cfg(feature = "candle")]
mod checks {
    use anyhow::{ensure, Error, Result};
    use candle_core::quantized::{gguf_file, GgmlDType, QTensor};
    use candle_core::{DType, Device, Tensor};
    use std::io::Cursor;
    use std::str::FromStr;
    use tokenizers::Tokenizer;

    const WORD_LEVEL_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": null,
        "post_processor": null,
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": { "<unk>": 0, "ok": 1 }, "unk_token": "<unk>" }
    }"#;

    pub fn tensor_runtime() -> Result<()> {
        let ones = Tensor::ones((2, 2), DType::F32, &Device::Cpu)?;
        let sum = ones.sum_all()?.to_scalar::<f32>()?;
        ensure!(sum == 4.0, "tensor runtime returned {} for a 2x2 sum", sum);
        Ok(())
    }

    pub fn model_loading() -> Result<()> {
        crate::providers::hub::build_api(None)?;

        let tokenizer = Tokenizer::from_str(WORD_LEVEL_TOKENIZER).map_err(Error::msg)?;
        let encoding = tokenizer.encode("ok", false).map_err(Error::msg)?;
        ensure!(
            encoding.get_ids() == [1],
            "tokenizer produced {:?}",
            encoding.get_ids()
        );
        Ok(())
    }

    /// Writes one 4-bit k-quant block to an in-memory GGUF file and reads it
    /// back, the same path the backend takes for pre-quantized weights.
    pub fn quantization() -> Result<()> {
        let block = Tensor::zeros((1, 256), DType::F32, &Device::Cpu)?;
        let quantized = QTensor::quantize(&block, GgmlDType::Q4K)?;

        let architecture = gguf_file::Value::String("llama".to_string());
        let mut file = Cursor::new(Vec::new());
        gguf_file::write(
            &mut file,
            &[("general.architecture", &architecture)],
            &[("block", &quantized)],
        )?;

        file.set_position(0);
        let content = gguf_file::Content::read(&mut file)?;
        let tensor = content.tensor(&mut file, "block", &Device::Cpu)?;
        ensure!(
            tensor.dtype() == GgmlDType::Q4K,
            "GGUF round trip produced {:?}",
            tensor.dtype()
        );
        Ok(())
    }
}

#[cfg(not(feature = "candle"))]
mod checks {
    use anyhow::{bail, Result};

    pub fn tensor_runtime() -> Result<()> {
        bail!("built without the `candle` feature")
    }

    pub fn model_loading() -> Result<()> {
        bail!("built without the `candle` feature")
    }

    pub fn quantization() -> Result<()> {
        bail!("built without the `candle` feature")
    }
}
