//! # modelcheck - model readiness harness
//!
//! Loads a causal language model checkpoint, optionally in 4-bit, places it
//! on the best available device and runs one test generation to confirm the
//! model is usable on this machine.
//!
//! ## Features
//!
//! - Capability probing with graceful fallback to a simulated response
//! - 4-bit loading policy and device/precision resolution
//! - Distinct failure kinds: missing dependency, load failure, inference failure
//!
//! ## Usage
//!
//! ```rust,no_run
//! use modelcheck::config::{CliOverrides, RunConfig, Settings};
//! use modelcheck::harness::{Harness, Reporter};
//! use modelcheck::probe::SystemProbe;
//! use modelcheck::providers::DefaultConnector;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let config = RunConfig::from_env(&CliOverrides::default(), &settings)?;
//!
//!     let harness = Harness::new(&SystemProbe, &DefaultConnector);
//!     let outcome = harness.run(&config, &mut Reporter::stdio());
//!     std::process::exit(outcome.exit_code);
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod harness;
pub mod inference;
pub mod loader;
pub mod models;
pub mod probe;
pub mod providers;
pub mod quantization;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{CliOverrides, Preset, RunConfig, Settings};
pub use error::{FailureKind, HarnessError};
pub use harness::{Harness, Reporter, RunOutcome};
pub use models::{
    Backend, CapabilityRecord, CausalLm, DeviceAssignment, DeviceKind, QuantizationConfig,
    TextTokenizer,
};
