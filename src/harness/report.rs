use std::io::{self, Stderr, Stdout, Write};
use tracing::debug;

use crate::error::{FailureKind, HarnessError};
use crate::models::{DeviceAssignment, InferenceResult, QuantizationConfig, WeightFormat};
use crate::utils::model_inspector::HostContext;

pub const RESPONSE_BANNER: &str = "--- Model Response ---";

/// Human-readable progress and results. Status and results go to `out`,
/// failures to `err`. Write errors are logged and otherwise ignored so
/// reporting can never change the outcome of a run.
pub struct Reporter<O: Write, E: Write> {
    out: O,
    err: E,
}

impl Reporter<Stdout, Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> Reporter<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }

    pub fn simulated(&mut self, model_id: &str, response: &str) {
        self.say(&format!("Simulated load for model: {}", model_id));
        self.say("This is a simulated run: no model was loaded and no dependencies were used.");
        self.response(response);
    }

    pub fn degraded(&mut self, failure: &HarnessError) {
        self.say(&format!(
            "⚠️  {}. Falling back to a simulated response (--auto-simulate).",
            failure
        ));
    }

    pub fn loading(&mut self, model_id: &str, device: &DeviceAssignment) {
        self.say(&format!("Loading model: {}", model_id));
        self.say(&format!("Target device: {}", device));
        self.say("This may take several minutes depending on the model and connection...");
    }

    pub fn loaded(
        &mut self,
        device_label: &str,
        device: &DeviceAssignment,
        weights: &WeightFormat,
        quantization: Option<&QuantizationConfig>,
        host: &HostContext,
    ) {
        self.say("✅ Model and tokenizer loaded successfully!");
        self.say(&format!("Model device: {} [{}]", device_label, device));
        self.say(&format!("Weights: {}", weights));
        if let Some(quant) = quantization {
            if !weights.is_quantized() {
                self.say(&format!(
                    "⚠️  {}-bit loading was requested but no {}-bit weights were found; loaded {} instead",
                    quant.bits, quant.bits, weights
                ));
            }
        }
        self.say(&format!("Host: {}", host.summary()));
    }

    pub fn inference(&mut self, result: &InferenceResult) {
        self.response(&result.decoded_text);
        self.say(&format!(
            "({} new tokens in {:.2?})",
            result.generated_tokens, result.elapsed
        ));
    }

    pub fn failure(&mut self, failure: &HarnessError) {
        let headline = match failure.kind() {
            FailureKind::DependencyMissing => "Required packages are not available",
            FailureKind::LoadFailure => "Failed to load model",
            FailureKind::InferenceFailure => "Model loaded but inference failed",
        };
        self.complain(&format!("❌ {}: {}", headline, failure));
        self.complain(&format!("💡 {}", failure.hint()));
    }

    fn response(&mut self, text: &str) {
        self.say("");
        self.say(RESPONSE_BANNER);
        self.say(text);
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line) {
            debug!("Could not write report line: {}", e);
        }
    }

    fn complain(&mut self, line: &str) {
        if let Err(e) = writeln!(self.err, "{}", line) {
            debug!("Could not write failure line: {}", e);
        }
    }
}
