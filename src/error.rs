//! Failure taxonomy for a harness run.
//!
//! Every way a run can end badly maps to exactly one [`HarnessError`]
//! variant, and each variant maps to its own exit code and remediation hint.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::Capability;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    /// Load or inference failure.
    pub const RUN_FAILURE: i32 = 1;
    /// Required capabilities are not available in this build or environment.
    pub const DEPENDENCY_MISSING: i32 = 2;
    /// Command line could not be parsed.
    pub const USAGE: i32 = 64;
    /// Settings file unreadable or invalid.
    pub const CONFIG: i32 = 78;
}

/// Which acquisition failed while loading a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    /// Connecting to the loading capability itself.
    Backend,
    Tokenizer,
    Model,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStage::Backend => write!(f, "backend"),
            LoadStage::Tokenizer => write!(f, "tokenizer"),
            LoadStage::Model => write!(f, "model"),
        }
    }
}

/// Coarse classification used for exit codes, hints and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    DependencyMissing,
    LoadFailure,
    InferenceFailure,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    /// One or more required capabilities are absent
    #[error("missing required capabilities: {}", join_capabilities(.missing))]
    DependencyMissing { missing: Vec<Capability> },

    /// Checkpoint acquisition raised during loading
    #[error("failed to load {stage} for '{model_id}': {message}")]
    LoadFailure {
        model_id: String,
        stage: LoadStage,
        message: String,
    },

    /// Generation or decoding raised after a successful load
    #[error("generation failed: {message}")]
    InferenceFailure { message: String },
}

fn join_capabilities(missing: &[Capability]) -> String {
    missing
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl HarnessError {
    pub fn load(model_id: &str, stage: LoadStage, error: &anyhow::Error) -> Self {
        Self::LoadFailure {
            model_id: model_id.to_string(),
            stage,
            message: format!("{:#}", error),
        }
    }

    pub fn inference(error: &anyhow::Error) -> Self {
        Self::InferenceFailure {
            message: format!("{:#}", error),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::DependencyMissing { .. } => FailureKind::DependencyMissing,
            Self::LoadFailure { .. } => FailureKind::LoadFailure,
            Self::InferenceFailure { .. } => FailureKind::InferenceFailure,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            FailureKind::DependencyMissing => exit_code::DEPENDENCY_MISSING,
            FailureKind::LoadFailure | FailureKind::InferenceFailure => exit_code::RUN_FAILURE,
        }
    }

    /// What the operator should try next.
    pub fn hint(&self) -> &'static str {
        match self.kind() {
            FailureKind::DependencyMissing => {
                "Rebuild with the default `candle` feature enabled, or rerun with --simulate \
                 (or --auto-simulate) to see a sample response."
            }
            FailureKind::LoadFailure => {
                "Check the model identifier, revision and hub credentials (HF_TOKEN). \
                 On a local machine, make sure GPU drivers match the enabled cuda/metal feature."
            }
            FailureKind::InferenceFailure => {
                "The checkpoint loaded but generation crashed. Check available device memory, \
                 or retry with --no-quant or the quick preset."
            }
        }
    }
}

/// Errors raised while reading the settings file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}
