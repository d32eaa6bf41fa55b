#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use modelcheck::config::{CliOverrides, RunConfig, Settings};
use modelcheck::harness::Connector;
use modelcheck::models::{
    Backend, CapabilityRecord, CausalLm, DeviceKind, GenerationParams, LoadRequest, Precision,
    TensorRuntime, TextTokenizer, WeightFormat,
};
use modelcheck::probe::CapabilityProbe;

/// Special token id; byte values 0..=255 are ordinary text.
pub const EOS: u32 = 256;
pub const REPLY: &str = " Phases change when energy is added or removed.";

/// Shared, inspectable state behind every fake handed out by one connector.
#[derive(Default)]
pub struct FakeState {
    pub accelerator: Cell<bool>,
    pub fail_connect: RefCell<Option<String>>,
    pub fail_tokenizer: RefCell<Option<String>>,
    pub fail_model: RefCell<Option<String>>,
    pub fail_generation: RefCell<Option<String>>,
    /// Weights the backend "finds"; derived from the request when unset.
    pub loaded_format: RefCell<Option<WeightFormat>>,
    pub tokenizer_loads: Cell<usize>,
    pub model_loads: Cell<usize>,
    pub requests: RefCell<Vec<LoadRequest>>,
    pub placements: RefCell<Vec<DeviceKind>>,
    pub params: RefCell<Vec<GenerationParams>>,
}

impl FakeState {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn last_request(&self) -> LoadRequest {
        self.requests
            .borrow()
            .last()
            .cloned()
            .expect("no load request recorded")
    }
}

pub struct FakeBackend {
    pub state: Rc<FakeState>,
}

impl FakeBackend {
    pub fn new(state: &Rc<FakeState>) -> Self {
        Self {
            state: Rc::clone(state),
        }
    }
}

impl TensorRuntime for FakeBackend {
    fn accelerator_available(&self) -> bool {
        self.state.accelerator.get()
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn load_tokenizer(&self, request: &LoadRequest) -> Result<Box<dyn TextTokenizer>> {
        self.state.tokenizer_loads.set(self.state.tokenizer_loads.get() + 1);
        self.state.requests.borrow_mut().push(request.clone());
        if let Some(message) = self.state.fail_tokenizer.borrow().as_ref() {
            return Err(anyhow!("{}", message));
        }
        Ok(Box::new(ByteTokenizer))
    }

    fn load_model(&self, request: &LoadRequest) -> Result<Box<dyn CausalLm>> {
        self.state.model_loads.set(self.state.model_loads.get() + 1);
        if let Some(message) = self.state.fail_model.borrow().as_ref() {
            return Err(anyhow!("{}", message));
        }
        let label = match request.device.kind {
            DeviceKind::Accelerator => "fake-gpu:0",
            DeviceKind::GeneralPurpose => "cpu",
        };
        let format = self
            .state
            .loaded_format
            .borrow()
            .clone()
            .unwrap_or_else(|| match (&request.quantization, request.device.precision) {
                (Some(quant), _) => WeightFormat::Quantized {
                    bits: quant.bits,
                    scheme: "Q4_K_M".to_string(),
                },
                (None, Precision::Half) => WeightFormat::Float("f16".to_string()),
                (None, Precision::Default) => WeightFormat::Float("f32".to_string()),
            });
        Ok(Box::new(ScriptedModel {
            state: Rc::clone(&self.state),
            label: label.to_string(),
            format,
        }))
    }
}

/// One token per byte; ids at or above 256 are special and dropped on decode.
pub struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = ids.iter().filter(|&&id| id < EOS).map(|&id| id as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_ids(&self) -> Vec<u32> {
        vec![EOS]
    }
}

/// Emits `REPLY` byte by byte, then EOS, within the token bound.
pub struct ScriptedModel {
    state: Rc<FakeState>,
    label: String,
    format: WeightFormat,
}

impl CausalLm for ScriptedModel {
    fn generate(
        &mut self,
        _prompt: &[u32],
        inputs_on: DeviceKind,
        params: &GenerationParams,
        stop_tokens: &[u32],
    ) -> Result<Vec<u32>> {
        self.state.placements.borrow_mut().push(inputs_on);
        self.state.params.borrow_mut().push(params.clone());
        if let Some(message) = self.state.fail_generation.borrow().as_ref() {
            return Err(anyhow!("{}", message));
        }

        let mut out = Vec::new();
        for id in REPLY.bytes().map(u32::from).chain(std::iter::once(EOS)) {
            if out.len() == params.max_new_tokens {
                break;
            }
            out.push(id);
            if stop_tokens.contains(&id) {
                break;
            }
        }
        Ok(out)
    }

    fn device_label(&self) -> String {
        self.label.clone()
    }

    fn weight_format(&self) -> WeightFormat {
        self.format.clone()
    }
}

pub struct FakeConnector {
    pub state: Rc<FakeState>,
}

impl FakeConnector {
    pub fn new(state: &Rc<FakeState>) -> Self {
        Self {
            state: Rc::clone(state),
        }
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _config: &RunConfig) -> Result<Box<dyn Backend>> {
        if let Some(message) = self.state.fail_connect.borrow().as_ref() {
            return Err(anyhow!("{}", message));
        }
        Ok(Box::new(FakeBackend::new(&self.state)))
    }
}

/// Fixed capability record that counts how often it was asked.
pub struct CountingProbe {
    pub record: CapabilityRecord,
    pub calls: Cell<usize>,
}

impl CountingProbe {
    pub fn new(record: CapabilityRecord) -> Self {
        Self {
            record,
            calls: Cell::new(0),
        }
    }
}

impl CapabilityProbe for CountingProbe {
    fn probe(&self) -> CapabilityRecord {
        self.calls.set(self.calls.get() + 1);
        self.record
    }
}

pub fn run_config(cli: CliOverrides) -> RunConfig {
    RunConfig::resolve(&cli, &Settings::default(), None).expect("valid config")
}
