mod common;

use common::*;
use modelcheck::config::{CliOverrides, Preset};
use modelcheck::error::{exit_code, FailureKind, LoadStage};
use modelcheck::harness::report::RESPONSE_BANNER;
use modelcheck::harness::{simulate_response, Harness, Reporter, RunOutcome};
use modelcheck::models::{CapabilityRecord, DeviceKind, Placement, Precision, WeightFormat};
use modelcheck::probe::StaticProbe;
use modelcheck::HarnessError;

fn run(
    cli: CliOverrides,
    record: CapabilityRecord,
    state: &std::rc::Rc<FakeState>,
) -> (RunOutcome, String, String) {
    let config = run_config(cli);
    let probe = StaticProbe(record);
    let connector = FakeConnector::new(state);
    let mut reporter = Reporter::new(Vec::new(), Vec::new());

    let outcome = Harness::new(&probe, &connector).run(&config, &mut reporter);

    let (out, err) = reporter.into_inner();
    (
        outcome,
        String::from_utf8(out).unwrap(),
        String::from_utf8(err).unwrap(),
    )
}

#[test]
fn test_simulate_prints_phase_transition_answer() {
    let state = FakeState::new();
    let (outcome, out, _) = run(
        CliOverrides {
            simulate: true,
            ..Default::default()
        },
        CapabilityRecord::all_present(),
        &state,
    );

    assert_eq!(outcome.exit_code, exit_code::SUCCESS);
    assert!(outcome.simulated);
    assert!(out.contains(RESPONSE_BANNER));
    assert!(out.contains("A phase transition is when a substance changes states"));
    assert_eq!(state.tokenizer_loads.get(), 0);
    assert_eq!(state.model_loads.get(), 0);
}

#[test]
fn test_simulate_ignores_model_and_quantization_flags() {
    let baseline = run(
        CliOverrides {
            simulate: true,
            ..Default::default()
        },
        CapabilityRecord::all_present(),
        &FakeState::new(),
    )
    .0;

    for (model, no_quant) in [
        (Some("org/other-model".to_string()), false),
        (None, true),
        (Some("does/not-exist".to_string()), true),
    ] {
        let (outcome, _, _) = run(
            CliOverrides {
                simulate: true,
                model,
                no_quant,
                ..Default::default()
            },
            CapabilityRecord::none(),
            &FakeState::new(),
        );
        assert_eq!(outcome.exit_code, exit_code::SUCCESS);
        assert_eq!(outcome.response, baseline.response);
        assert_eq!(
            outcome.response.as_deref(),
            Some(simulate_response(Preset::Full.prompt()))
        );
    }
}

#[test]
fn test_simulate_never_probes() {
    let probe = CountingProbe::new(CapabilityRecord::none());
    let state = FakeState::new();
    let connector = FakeConnector::new(&state);
    let config = run_config(CliOverrides {
        simulate: true,
        ..Default::default()
    });

    let outcome =
        Harness::new(&probe, &connector).run(&config, &mut Reporter::new(Vec::new(), Vec::new()));

    assert!(outcome.is_success());
    assert_eq!(probe.calls.get(), 0);
    assert!(outcome.capabilities.is_none());
}

#[test]
fn test_full_run_with_quantization() {
    let state = FakeState::new();
    state.accelerator.set(true);
    let (outcome, out, err) = run(
        CliOverrides {
            model: Some("org/valid-7b".to_string()),
            ..Default::default()
        },
        CapabilityRecord::all_present(),
        &state,
    );

    assert_eq!(outcome.exit_code, exit_code::SUCCESS, "stderr: {}", err);
    let quant = outcome.quantization.clone().expect("quantization configured");
    assert_eq!(quant.bits, 4);
    assert_eq!(quant.quant_scheme, "nf4");
    assert!(quant.double_quant);

    let request = state.last_request();
    assert_eq!(request.model_id, "org/valid-7b");
    assert_eq!(request.quantization, Some(quant));
    assert_eq!(request.device.kind, DeviceKind::Accelerator);
    assert_eq!(request.device.placement, Placement::Automatic);
    assert_eq!(request.device.precision, Precision::Half);
    assert!(!request.trust_remote_code);

    assert!(out.contains("Loading model: org/valid-7b"));
    assert!(out.contains("Model device: fake-gpu:0"));
    assert!(out.contains("Weights: 4-bit (Q4_K_M)"));
    assert!(outcome.weights.as_ref().is_some_and(WeightFormat::is_quantized));
    assert!(out.contains(REPLY.trim()));
    assert!(err.is_empty());
}

#[test]
fn test_no_quant_run_loads_at_default_precision() {
    let state = FakeState::new();
    let (outcome, out, _) = run(
        CliOverrides {
            no_quant: true,
            ..Default::default()
        },
        CapabilityRecord::all_present(),
        &state,
    );

    assert_eq!(outcome.exit_code, exit_code::SUCCESS);
    assert!(outcome.quantization.is_none());

    let request = state.last_request();
    assert!(request.quantization.is_none());
    assert_eq!(request.device.kind, DeviceKind::GeneralPurpose);
    assert_eq!(request.device.precision, Precision::Default);
    assert_eq!(state.model_loads.get(), 1);
    assert!(out.contains("Model and tokenizer loaded successfully"));
}

#[test]
fn test_quantization_absent_when_probe_reports_no_support() {
    let state = FakeState::new();
    let record = CapabilityRecord {
        has_quantization_support: false,
        ..CapabilityRecord::all_present()
    };
    let (outcome, _, _) = run(CliOverrides::default(), record, &state);

    assert!(outcome.is_success());
    assert!(outcome.quantization.is_none());
    assert!(state.last_request().quantization.is_none());
}

#[test]
fn test_missing_model_loading_exits_with_dependency_code() {
    let state = FakeState::new();
    let record = CapabilityRecord {
        has_model_loading: false,
        ..CapabilityRecord::all_present()
    };
    let (outcome, out, err) = run(CliOverrides::default(), record, &state);

    assert_eq!(outcome.exit_code, exit_code::DEPENDENCY_MISSING);
    assert_eq!(
        outcome.failure.as_ref().map(HarnessError::kind),
        Some(FailureKind::DependencyMissing)
    );
    assert!(err.contains("Required packages are not available"));
    assert!(err.contains("model loading"));
    assert!(!out.contains(RESPONSE_BANNER));
    assert_eq!(state.model_loads.get(), 0);
}

#[test]
fn test_missing_tensor_runtime_with_auto_simulate_degrades() {
    let state = FakeState::new();
    let record = CapabilityRecord {
        has_tensor_runtime: false,
        ..CapabilityRecord::all_present()
    };
    let (outcome, out, _) = run(
        CliOverrides {
            auto_simulate: true,
            ..Default::default()
        },
        record,
        &state,
    );

    assert_eq!(outcome.exit_code, exit_code::SUCCESS);
    assert!(outcome.simulated);
    assert_eq!(outcome.capabilities, Some(record));
    assert!(out.contains("Falling back to a simulated response"));
    assert!(out.contains("A phase transition is when a substance changes states"));
    assert_eq!(state.tokenizer_loads.get(), 0);
}

#[test]
fn test_model_load_failure_is_classified() {
    let state = FakeState::new();
    *state.fail_model.borrow_mut() = Some("404: repository not found".to_string());
    let (outcome, out, err) = run(
        CliOverrides {
            model: Some("not/a-model".to_string()),
            ..Default::default()
        },
        CapabilityRecord::all_present(),
        &state,
    );

    assert_eq!(outcome.exit_code, exit_code::RUN_FAILURE);
    match outcome.failure {
        Some(HarnessError::LoadFailure {
            ref model_id,
            stage,
            ref message,
        }) => {
            assert_eq!(model_id, "not/a-model");
            assert_eq!(stage, LoadStage::Model);
            assert!(message.contains("repository not found"));
        }
        ref other => panic!("expected load failure, got {:?}", other),
    }
    assert!(err.contains("Failed to load model"));
    assert!(!err.contains("Required packages"));
    assert!(!out.contains(RESPONSE_BANNER));
    assert!(out.contains("Target device: cpu (automatic placement, f16)"));
    assert!(outcome.device.is_some());
}

#[test]
fn test_requested_four_bit_but_loaded_half_precision_is_reported() {
    let state = FakeState::new();
    state.accelerator.set(true);
    *state.loaded_format.borrow_mut() = Some(WeightFormat::Float("f16".to_string()));
    let (outcome, out, _) = run(CliOverrides::default(), CapabilityRecord::all_present(), &state);

    assert!(outcome.is_success());
    assert!(outcome.quantization.is_some());
    assert_eq!(outcome.weights, Some(WeightFormat::Float("f16".to_string())));
    assert!(out.contains("Weights: f16"));
    assert!(out.contains("4-bit loading was requested but no 4-bit weights were found"));
}

#[test]
fn test_default_model_searches_companion_gguf_repo() {
    let state = FakeState::new();
    run(CliOverrides::default(), CapabilityRecord::all_present(), &state);
    assert_eq!(
        state.last_request().gguf_model_id.as_deref(),
        Some("bartowski/DeepSeek-R1-Distill-Qwen-7B-GGUF")
    );
}

#[test]
fn test_backend_connect_failure_is_a_load_failure() {
    let state = FakeState::new();
    *state.fail_connect.borrow_mut() = Some("hub cache not writable".to_string());
    let (outcome, _, err) = run(CliOverrides::default(), CapabilityRecord::all_present(), &state);

    assert_eq!(outcome.exit_code, exit_code::RUN_FAILURE);
    assert!(matches!(
        outcome.failure,
        Some(HarnessError::LoadFailure {
            stage: LoadStage::Backend,
            ..
        })
    ));
    assert!(err.contains("hub cache not writable"));
}

#[test]
fn test_inference_failure_produces_no_partial_output() {
    let state = FakeState::new();
    *state.fail_generation.borrow_mut() = Some("CUDA out of memory".to_string());
    let (outcome, out, err) = run(CliOverrides::default(), CapabilityRecord::all_present(), &state);

    assert_eq!(outcome.exit_code, exit_code::RUN_FAILURE);
    assert_eq!(
        outcome.failure.as_ref().map(HarnessError::kind),
        Some(FailureKind::InferenceFailure)
    );
    assert!(outcome.response.is_none());
    assert!(!out.contains(RESPONSE_BANNER));
    assert!(err.contains("Model loaded but inference failed"));
    assert!(err.contains("CUDA out of memory"));
}

#[test]
fn test_quick_preset_uses_fixed_placement_and_small_bound() {
    let state = FakeState::new();
    let (outcome, out, _) = run(
        CliOverrides {
            preset: Some(Preset::Quick),
            ..Default::default()
        },
        CapabilityRecord::all_present(),
        &state,
    );

    assert!(outcome.is_success());
    assert!(outcome.quantization.is_none());
    let request = state.last_request();
    assert_eq!(request.model_id, "TinyLlama/TinyLlama-1.1B-Chat-v1.0");
    assert_eq!(request.device.placement, Placement::Fixed);
    assert_eq!(state.params.borrow()[0].max_new_tokens, 50);
    assert!(out.contains("Explain the water cycle in simple terms."));
}

#[test]
fn test_trust_remote_code_is_passed_only_when_requested() {
    let state = FakeState::new();
    run(
        CliOverrides {
            trust_remote_code: true,
            ..Default::default()
        },
        CapabilityRecord::all_present(),
        &state,
    );
    assert!(state.last_request().trust_remote_code);
}
