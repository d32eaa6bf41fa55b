use anyhow::{ensure, Result};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::HarnessError;
use crate::loader::LoadedCheckpoint;
use crate::models::{DeviceAssignment, DeviceKind, GenerationParams, InferenceResult, TensorRuntime};

/// Where the prompt tensors go. The accelerator is only used if the assignment
/// asked for it and the runtime still confirms one is available.
pub fn input_placement<R: TensorRuntime + ?Sized>(device: &DeviceAssignment, runtime: &R) -> DeviceKind {
    if device.kind == DeviceKind::Accelerator && runtime.accelerator_available() {
        DeviceKind::Accelerator
    } else {
        DeviceKind::GeneralPurpose
    }
}

/// Runs the single test generation. Any error is an inference failure and
/// nothing partial is returned.
pub fn run_inference<R: TensorRuntime + ?Sized>(
    checkpoint: &mut LoadedCheckpoint,
    prompt: &str,
    device: &DeviceAssignment,
    runtime: &R,
    params: &GenerationParams,
) -> Result<InferenceResult, HarnessError> {
    generate(checkpoint, prompt, device, runtime, params).map_err(|e| HarnessError::inference(&e))
}

fn generate<R: TensorRuntime + ?Sized>(
    checkpoint: &mut LoadedCheckpoint,
    prompt: &str,
    device: &DeviceAssignment,
    runtime: &R,
    params: &GenerationParams,
) -> Result<InferenceResult> {
    ensure!(params.max_new_tokens > 0, "max_new_tokens must be positive");

    let prompt_ids = checkpoint.tokenizer.encode(prompt)?;
    ensure!(!prompt_ids.is_empty(), "prompt encoded to zero tokens");
    debug!("Prompt encoded to {} tokens", prompt_ids.len());

    let placement = input_placement(device, runtime);
    let stop_tokens = checkpoint.tokenizer.eos_token_ids();
    let start = Instant::now();
    let generated = checkpoint
        .model
        .generate(&prompt_ids, placement, params, &stop_tokens)?;
    ensure!(
        generated.len() <= params.max_new_tokens,
        "model produced {} tokens, over the bound of {}",
        generated.len(),
        params.max_new_tokens
    );
    let elapsed = start.elapsed();

    let mut sequence = prompt_ids;
    sequence.extend_from_slice(&generated);
    let decoded_text = checkpoint.tokenizer.decode(&sequence)?;

    info!(
        "Generated {} tokens in {:.2?} on {}",
        generated.len(),
        elapsed,
        checkpoint.model.device_label()
    );

    Ok(InferenceResult {
        decoded_text,
        generated_tokens: generated.len(),
        elapsed,
    })
}
