use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One of the heavy capabilities the harness depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    TensorRuntime,
    ModelLoading,
    Quantization,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::TensorRuntime => write!(f, "tensor runtime"),
            Capability::ModelLoading => write!(f, "model loading"),
            Capability::Quantization => write!(f, "quantization"),
        }
    }
}

/// What the capability probe found at startup. Never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityRecord {
    pub has_tensor_runtime: bool,
    pub has_model_loading: bool,
    pub has_quantization_support: bool,
}

impl CapabilityRecord {
    pub fn all_present() -> Self {
        Self {
            has_tensor_runtime: true,
            has_model_loading: true,
            has_quantization_support: true,
        }
    }

    pub fn none() -> Self {
        Self {
            has_tensor_runtime: false,
            has_model_loading: false,
            has_quantization_support: false,
        }
    }

    /// Required capabilities that are absent. Quantization is optional and never listed.
    pub fn missing(&self) -> Vec<Capability> {
        let mut missing = Vec::new();
        if !self.has_tensor_runtime {
            missing.push(Capability::TensorRuntime);
        }
        if !self.has_model_loading {
            missing.push(Capability::ModelLoading);
        }
        missing
    }

    pub fn can_run_inference(&self) -> bool {
        self.missing().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 16-bit floating point.
    Half,
    /// Whatever the loading capability picks on its own.
    Default,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Half => write!(f, "f16"),
            Precision::Default => write!(f, "default precision"),
        }
    }
}

/// Reduced-precision loading configuration. Only ever built by
/// [`crate::quantization::build_quantization_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizationConfig {
    pub enabled: bool,
    pub bits: u8,
    pub compute_precision: Precision,
    pub quant_scheme: &'static str,
    pub double_quant: bool,
}

/// The form the weights were actually loaded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightFormat {
    /// Pre-quantized weights, e.g. `bits: 4, scheme: "Q4_K_M"`.
    Quantized { bits: u8, scheme: String },
    /// Full weights at a float precision such as "f16" or "f32".
    Float(String),
}

impl WeightFormat {
    pub fn is_quantized(&self) -> bool {
        matches!(self, WeightFormat::Quantized { .. })
    }
}

impl fmt::Display for WeightFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightFormat::Quantized { bits, scheme } => write!(f, "{}-bit ({})", bits, scheme),
            WeightFormat::Float(dtype) => write!(f, "{}", dtype),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Accelerator,
    GeneralPurpose,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Accelerator => write!(f, "accelerator"),
            DeviceKind::GeneralPurpose => write!(f, "cpu"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// The loading capability decides where layers live.
    Automatic,
    /// The whole model is pinned to one device.
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAssignment {
    pub kind: DeviceKind,
    pub placement: Placement,
    pub precision: Precision,
}

impl fmt::Display for DeviceAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let placement = match self.placement {
            Placement::Automatic => "automatic placement",
            Placement::Fixed => "fixed placement",
        };
        write!(f, "{} ({}, {})", self.kind, placement, self.precision)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Upper bound on generated tokens. Always finite and non-zero.
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_p: Option<f64>,
    /// Fixed sampling seed; a random one is drawn when unset.
    pub seed: Option<u64>,
}

/// Everything handed to the loading capability for one checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub model_id: String,
    pub revision: Option<String>,
    /// Where to look for pre-quantized weights; `model_id` when unset.
    pub gguf_model_id: Option<String>,
    pub quantization: Option<QuantizationConfig>,
    pub device: DeviceAssignment,
    pub trust_remote_code: bool,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub decoded_text: String,
    pub generated_tokens: usize,
    pub elapsed: Duration,
}

impl fmt::Display for InferenceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.decoded_text)
    }
}

/// Accelerator detection, asked again every time it matters.
pub trait TensorRuntime {
    fn accelerator_available(&self) -> bool;
}

pub trait TextTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    /// Decodes ids with special tokens stripped.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Ids the tokenizer knows as end-of-sequence markers.
    fn eos_token_ids(&self) -> Vec<u32> {
        Vec::new()
    }
}

pub trait CausalLm {
    /// Samples up to `params.max_new_tokens` continuation tokens for `prompt`,
    /// with the input tensors placed on `inputs_on`. Stops after emitting any
    /// of `stop_tokens`.
    fn generate(
        &mut self,
        prompt: &[u32],
        inputs_on: DeviceKind,
        params: &GenerationParams,
        stop_tokens: &[u32],
    ) -> Result<Vec<u32>>;

    /// Where the weights actually ended up, e.g. "cuda:0".
    fn device_label(&self) -> String;

    fn weight_format(&self) -> WeightFormat;
}

/// The external loading capability.
pub trait Backend: TensorRuntime {
    fn name(&self) -> &str;
    fn load_tokenizer(&self, request: &LoadRequest) -> Result<Box<dyn TextTokenizer>>;
    fn load_model(&self, request: &LoadRequest) -> Result<Box<dyn CausalLm>>;
}
