use anyhow::{anyhow, bail, Error, Result};
use std::time::Instant;
use tracing::{debug, info, warn};

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::{llama, quantized_llama, quantized_qwen2, qwen2};
use hf_hub::api::sync::Api;
use tokenizers::Tokenizer;

use super::gguf_model;
use super::hub::{self, HubCheckpoint};
use crate::config::RunConfig;
use crate::models::{
    Backend, CausalLm, DeviceKind, GenerationParams, LoadRequest, Precision, TensorRuntime,
    TextTokenizer, WeightFormat,
};

/// Token strings treated as end-of-sequence when the tokenizer knows them.
const EOS_TOKENS: &[&str] = &["</s>", "<|endoftext|>", "<|im_end|>", "<|eot_id|>", "<｜end▁of▁sentence｜>"];

/// First CUDA or Metal device, if one can actually be opened right now.
pub fn accelerator_device() -> Option<Device> {
    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => return Some(device),
            Err(e) => debug!("CUDA compiled in but unusable: {}", e),
        }
    }
    if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => return Some(device),
            Err(e) => debug!("Metal compiled in but unusable: {}", e),
        }
    }
    None
}

fn device_label(device: &Device) -> String {
    match device {
        Device::Cpu => "cpu".to_string(),
        Device::Cuda(_) => "cuda:0".to_string(),
        Device::Metal(_) => "metal:0".to_string(),
    }
}

/// Loads checkpoints from the Hugging Face hub and runs them with candle.
pub struct CandleBackend {
    api: Api,
}

impl CandleBackend {
    pub fn new(config: &RunConfig) -> Result<Self> {
        Ok(Self {
            api: hub::build_api(config.cache_dir.as_deref())?,
        })
    }

    fn checkpoint(&self, request: &LoadRequest) -> HubCheckpoint {
        HubCheckpoint::open(&self.api, &request.model_id, request.revision.as_deref())
    }

    /// The repository holding pre-quantized weights. The revision only applies
    /// when that is the model repository itself.
    fn gguf_checkpoint(&self, request: &LoadRequest) -> HubCheckpoint {
        match request.gguf_model_id.as_deref() {
            Some(id) if id != request.model_id => HubCheckpoint::open(&self.api, id, None),
            _ => self.checkpoint(request),
        }
    }

    fn target_device(request: &LoadRequest) -> Result<Device> {
        match request.device.kind {
            DeviceKind::Accelerator => accelerator_device()
                .ok_or_else(|| anyhow!("accelerator was reported available but cannot be opened")),
            DeviceKind::GeneralPurpose => Ok(Device::Cpu),
        }
    }

    fn load_quantized(
        &self,
        request: &LoadRequest,
        device: &Device,
    ) -> Result<Option<gguf_model::GgufWeights>> {
        let checkpoint = self.gguf_checkpoint(request);
        let files = match checkpoint.files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list {} for GGUF weights: {:#}", checkpoint.model_id(), e);
                return Ok(None);
            }
        };
        match gguf_model::select_four_bit_file(&files) {
            Some(file) => Ok(Some(gguf_model::load(&checkpoint, &file, device)?)),
            None => {
                warn!(
                    "{} has no pre-quantized 4-bit GGUF file; loading full weights at half precision",
                    checkpoint.model_id()
                );
                Ok(None)
            }
        }
    }

    fn load_full(
        &self,
        checkpoint: &HubCheckpoint,
        config: &serde_json::Value,
        dtype: DType,
        device: &Device,
    ) -> Result<Weights> {
        let model_type = config
            .get("model_type")
            .and_then(|v| v.as_str())
            .unwrap_or("llama");
        let weight_files = checkpoint.safetensors()?;
        info!(
            "Loading {} weights from {} safetensors file(s) as {:?}...",
            model_type,
            weight_files.len(),
            dtype
        );

        // Read-only memory map of files in the hub cache.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weight_files, dtype, device)? };

        match model_type {
            "llama" | "mistral" => {
                let llama_config: llama::LlamaConfig = serde_json::from_value(config.clone())?;
                let llama_config = llama_config.into_config(false);
                let cache = llama::Cache::new(true, dtype, &llama_config, device)?;
                let model = llama::Llama::load(vb, &llama_config)?;
                Ok(Weights::Llama { model, cache })
            }
            "qwen2" => {
                let qwen_config: qwen2::Config = serde_json::from_value(config.clone())?;
                Ok(Weights::Qwen2(qwen2::ModelForCausalLM::new(&qwen_config, vb)?))
            }
            other => bail!("unsupported model_type '{}'", other),
        }
    }
}

impl TensorRuntime for CandleBackend {
    fn accelerator_available(&self) -> bool {
        accelerator_device().is_some()
    }
}

impl Backend for CandleBackend {
    fn name(&self) -> &str {
        "candle"
    }

    fn load_tokenizer(&self, request: &LoadRequest) -> Result<Box<dyn TextTokenizer>> {
        let path = match self.checkpoint(request).get("tokenizer.json") {
            Ok(path) => path,
            Err(e) if request.gguf_model_id.is_some() => {
                debug!("{:#}; trying the GGUF repository", e);
                self.gguf_checkpoint(request).get("tokenizer.json")?
            }
            Err(e) => return Err(e),
        };
        let tokenizer = Tokenizer::from_file(path).map_err(Error::msg)?;
        Ok(Box::new(HubTokenizer { inner: tokenizer }))
    }

    fn load_model(&self, request: &LoadRequest) -> Result<Box<dyn CausalLm>> {
        let start = Instant::now();
        let checkpoint = self.checkpoint(request);

        // GGUF files carry their own architecture and EOS metadata, so
        // config.json is only mandatory for full weights.
        let config = match checkpoint.config_json() {
            Ok(config) => {
                check_remote_code(&config, request)?;
                Some(config)
            }
            Err(e) if request.quantization.is_some() => {
                debug!("{:#}; relying on GGUF metadata", e);
                None
            }
            Err(e) => return Err(e),
        };

        let device = Self::target_device(request)?;
        let mut eos_token_ids = config.as_ref().map(eos_ids_from_config).unwrap_or_default();

        let quantized = match request.quantization {
            Some(_) => self.load_quantized(request, &device)?,
            None => None,
        };
        let (weights, format) = match quantized {
            Some(gguf) => {
                eos_token_ids.extend(gguf.eos_token_id);
                (gguf.weights, gguf.format)
            }
            None => {
                let config = config.ok_or_else(|| {
                    anyhow!(
                        "{} has neither config.json nor a 4-bit GGUF file",
                        request.model_id
                    )
                })?;
                let dtype = match request.device.precision {
                    Precision::Half => DType::F16,
                    Precision::Default => DType::F32,
                };
                let weights = self.load_full(&checkpoint, &config, dtype, &device)?;
                (weights, WeightFormat::Float(dtype.as_str().to_string()))
            }
        };

        eos_token_ids.sort_unstable();
        eos_token_ids.dedup();
        info!("Model loaded as {} in {:.2?}", format, start.elapsed());

        Ok(Box::new(CandleModel {
            weights,
            device,
            format,
            eos_token_ids,
        }))
    }
}

/// Checkpoints that declare custom model code (`auto_map`) are refused unless
/// the caller opted in. The custom code itself is never executed.
fn check_remote_code(config: &serde_json::Value, request: &LoadRequest) -> Result<()> {
    if config.get("auto_map").is_none() {
        return Ok(());
    }
    if !request.trust_remote_code {
        bail!(
            "{} declares custom model code (auto_map); rerun with --trust-remote-code to accept it",
            request.model_id
        );
    }
    warn!(
        "{} declares custom model code; it is not executed, the built-in implementation is used instead",
        request.model_id
    );
    Ok(())
}

/// `eos_token_id` may be a single id or a list.
fn eos_ids_from_config(config: &serde_json::Value) -> Vec<u32> {
    match config.get("eos_token_id") {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .into_iter()
            .collect(),
        Some(serde_json::Value::Array(ids)) => ids
            .iter()
            .filter_map(|v| v.as_u64())
            .filter_map(|id| u32::try_from(id).ok())
            .collect(),
        _ => Vec::new(),
    }
}

struct HubTokenizer {
    inner: Tokenizer,
}

impl TextTokenizer for HubTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.inner.encode(text, true).map_err(Error::msg)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner.decode(ids, true).map_err(Error::msg)
    }

    fn eos_token_ids(&self) -> Vec<u32> {
        EOS_TOKENS
            .iter()
            .filter_map(|t| self.inner.token_to_id(t))
            .collect()
    }
}

pub enum Weights {
    Llama { model: llama::Llama, cache: llama::Cache },
    Qwen2(qwen2::ModelForCausalLM),
    QuantizedLlama(quantized_llama::ModelWeights),
    QuantizedQwen2(quantized_qwen2::ModelWeights),
}

impl Weights {
    fn forward(&mut self, input: &Tensor, position: usize) -> candle_core::Result<Tensor> {
        match self {
            Weights::Llama { model, cache } => model.forward(input, position, cache),
            Weights::Qwen2(model) => model.forward(input, position),
            Weights::QuantizedLlama(model) => model.forward(input, position),
            Weights::QuantizedQwen2(model) => model.forward(input, position),
        }
    }
}

/// Logits of the final position as a 1-D f32 tensor, whatever rank the model returns.
fn last_position_logits(logits: &Tensor) -> candle_core::Result<Tensor> {
    let last = match logits.rank() {
        3 => {
            let (_, seq_len, _) = logits.dims3()?;
            logits.i((0, seq_len - 1))?
        }
        2 => logits.i(0)?,
        _ => logits.clone(),
    };
    last.to_dtype(DType::F32)
}

struct CandleModel {
    weights: Weights,
    device: Device,
    format: WeightFormat,
    eos_token_ids: Vec<u32>,
}

impl CausalLm for CandleModel {
    fn generate(
        &mut self,
        prompt: &[u32],
        inputs_on: DeviceKind,
        params: &GenerationParams,
        stop_tokens: &[u32],
    ) -> Result<Vec<u32>> {
        let input_device = match inputs_on {
            DeviceKind::Accelerator => self.device.clone(),
            DeviceKind::GeneralPurpose => Device::Cpu,
        };

        let seed = params.seed.unwrap_or_else(rand::random);
        let temperature = params.do_sample.then_some(params.temperature);
        let mut logits_processor = LogitsProcessor::new(seed, temperature, params.top_p);

        let mut tokens = prompt.to_vec();
        let mut generated = Vec::with_capacity(params.max_new_tokens);

        for step in 0..params.max_new_tokens {
            // Whole prompt first, then one token at a time against the KV cache.
            let (context, position) = if step == 0 {
                (&tokens[..], 0)
            } else {
                (&tokens[tokens.len() - 1..], tokens.len() - 1)
            };
            let input = Tensor::new(context, &input_device)?.unsqueeze(0)?;
            let logits = self.weights.forward(&input, position)?;
            let logits = last_position_logits(&logits)?;

            let next_token = logits_processor.sample(&logits)?;
            tokens.push(next_token);
            generated.push(next_token);

            if self.eos_token_ids.contains(&next_token) || stop_tokens.contains(&next_token) {
                debug!("End of sequence after {} tokens", generated.len());
                break;
            }
        }

        Ok(generated)
    }

    fn device_label(&self) -> String {
        device_label(&self.device)
    }

    fn weight_format(&self) -> WeightFormat {
        self.format.clone()
    }
}
