//! One end-to-end readiness run:
//! configuration → probe → {simulation | quantization → device → load → inference} → report.

pub mod fallback;
pub mod report;

use anyhow::Result;
use std::io::Write;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::device::resolve_device;
use crate::error::{exit_code, HarnessError, LoadStage};
use crate::inference::run_inference;
use crate::loader::Loader;
use crate::models::{
    Backend, CapabilityRecord, DeviceAssignment, InferenceResult, LoadRequest, QuantizationConfig,
    WeightFormat,
};
use crate::probe::CapabilityProbe;
use crate::quantization::build_quantization_config;
use crate::utils::model_inspector;

pub use fallback::simulate_response;
pub use report::Reporter;

/// Builds the loading capability once the probe has cleared the run.
pub trait Connector {
    fn connect(&self, config: &RunConfig) -> Result<Box<dyn Backend>>;
}

/// What happened during a run, for the exit code and for tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub exit_code: i32,
    /// `None` when simulation skipped the probe.
    pub capabilities: Option<CapabilityRecord>,
    pub quantization: Option<QuantizationConfig>,
    pub device: Option<DeviceAssignment>,
    /// Form the weights were actually loaded in.
    pub weights: Option<WeightFormat>,
    pub simulated: bool,
    /// The printed response, real or simulated.
    pub response: Option<String>,
    pub failure: Option<HarnessError>,
}

impl RunOutcome {
    fn simulated(capabilities: Option<CapabilityRecord>, response: &str) -> Self {
        Self {
            exit_code: exit_code::SUCCESS,
            capabilities,
            quantization: None,
            device: None,
            weights: None,
            simulated: true,
            response: Some(response.to_string()),
            failure: None,
        }
    }

    fn failed(
        capabilities: Option<CapabilityRecord>,
        quantization: Option<QuantizationConfig>,
        device: Option<DeviceAssignment>,
        failure: HarnessError,
    ) -> Self {
        Self {
            exit_code: failure.exit_code(),
            capabilities,
            quantization,
            device,
            weights: None,
            simulated: false,
            response: None,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == exit_code::SUCCESS
    }
}

pub struct Harness<'a> {
    probe: &'a dyn CapabilityProbe,
    connector: &'a dyn Connector,
}

impl<'a> Harness<'a> {
    pub fn new(probe: &'a dyn CapabilityProbe, connector: &'a dyn Connector) -> Self {
        Self { probe, connector }
    }

    pub fn run<O: Write, E: Write>(
        &self,
        config: &RunConfig,
        reporter: &mut Reporter<O, E>,
    ) -> RunOutcome {
        if config.simulate {
            info!("Simulation requested; skipping capability probe");
            return simulate(config, None, reporter);
        }

        let capabilities = self.probe.probe();
        info!(
            "Capabilities: tensor runtime={}, model loading={}, quantization={}",
            capabilities.has_tensor_runtime,
            capabilities.has_model_loading,
            capabilities.has_quantization_support
        );

        if !capabilities.can_run_inference() {
            let failure = HarnessError::DependencyMissing {
                missing: capabilities.missing(),
            };
            if config.auto_simulate {
                warn!("{}; degrading to simulated response", failure);
                reporter.degraded(&failure);
                return simulate(config, Some(capabilities), reporter);
            }
            reporter.failure(&failure);
            return RunOutcome::failed(Some(capabilities), None, None, failure);
        }

        let quantization = build_quantization_config(&capabilities, config);

        let backend = match self.connector.connect(config) {
            Ok(backend) => backend,
            Err(e) => {
                let failure = HarnessError::load(&config.model_id, LoadStage::Backend, &e);
                reporter.failure(&failure);
                return RunOutcome::failed(Some(capabilities), quantization, None, failure);
            }
        };

        let device = resolve_device(backend.as_ref(), quantization.as_ref(), config.preset.placement());
        let host = model_inspector::inspect_host();
        model_inspector::log_memory_outlook(&host, quantization.as_ref());

        let request = LoadRequest {
            model_id: config.model_id.clone(),
            revision: config.revision.clone(),
            gguf_model_id: config.gguf_model_id.clone(),
            quantization: quantization.clone(),
            device,
            trust_remote_code: config.trust_remote_code,
            cache_dir: config.cache_dir.clone(),
        };

        reporter.loading(&config.model_id, &device);
        let mut loader = Loader::new(backend.as_ref());
        let checkpoint = match loader.load(&request) {
            Ok(checkpoint) => checkpoint,
            Err(failure) => {
                reporter.failure(&failure);
                return RunOutcome::failed(Some(capabilities), quantization, Some(device), failure);
            }
        };
        let weights = checkpoint.model.weight_format();
        reporter.loaded(
            &checkpoint.model.device_label(),
            &device,
            &weights,
            quantization.as_ref(),
            &host,
        );

        match run_inference(
            checkpoint,
            &config.prompt,
            &device,
            backend.as_ref(),
            &config.generation,
        ) {
            Ok(result) => {
                reporter.inference(&result);
                succeeded(capabilities, quantization, device, weights, result)
            }
            Err(failure) => {
                reporter.failure(&failure);
                RunOutcome {
                    weights: Some(weights),
                    ..RunOutcome::failed(Some(capabilities), quantization, Some(device), failure)
                }
            }
        }
    }
}

fn simulate<O: Write, E: Write>(
    config: &RunConfig,
    capabilities: Option<CapabilityRecord>,
    reporter: &mut Reporter<O, E>,
) -> RunOutcome {
    let response = simulate_response(&config.prompt);
    reporter.simulated(&config.model_id, response);
    RunOutcome::simulated(capabilities, response)
}

fn succeeded(
    capabilities: CapabilityRecord,
    quantization: Option<QuantizationConfig>,
    device: DeviceAssignment,
    weights: WeightFormat,
    result: InferenceResult,
) -> RunOutcome {
    RunOutcome {
        exit_code: exit_code::SUCCESS,
        capabilities: Some(capabilities),
        quantization,
        device: Some(device),
        weights: Some(weights),
        simulated: false,
        response: Some(result.decoded_text),
        failure: None,
    }
}
