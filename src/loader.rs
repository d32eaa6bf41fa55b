//! Checkpoint loading as a small state machine:
//! `NotLoaded -> Loading -> {Loaded, LoadFailed}`.
//!
//! Both terminal states are sticky. A loader that failed once reports the
//! same failure on every later call and never retries.

use std::fmt;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::{HarnessError, LoadStage};
use crate::models::{Backend, CausalLm, LoadRequest, TextTokenizer};

pub struct LoadedCheckpoint {
    pub tokenizer: Box<dyn TextTokenizer>,
    pub model: Box<dyn CausalLm>,
}

pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded(LoadedCheckpoint),
    LoadFailed(HarnessError),
}

impl LoadState {
    pub fn name(&self) -> &'static str {
        match self {
            LoadState::NotLoaded => "not-loaded",
            LoadState::Loading => "loading",
            LoadState::Loaded(_) => "loaded",
            LoadState::LoadFailed(_) => "load-failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Loaded(_) | LoadState::LoadFailed(_))
    }
}

impl fmt::Debug for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::LoadFailed(e) => f.debug_tuple("LoadFailed").field(e).finish(),
            other => f.write_str(other.name()),
        }
    }
}

pub struct Loader<'a> {
    backend: &'a dyn Backend,
    state: LoadState,
}

impl<'a> Loader<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            state: LoadState::NotLoaded,
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Loads tokenizer then model, or returns the outcome of the earlier attempt.
    pub fn load(&mut self, request: &LoadRequest) -> Result<&mut LoadedCheckpoint, HarnessError> {
        if !self.state.is_terminal() {
            self.state = LoadState::Loading;
            self.state = match self.acquire(request) {
                Ok(checkpoint) => LoadState::Loaded(checkpoint),
                Err(e) => LoadState::LoadFailed(e),
            };
        }

        match &mut self.state {
            LoadState::Loaded(checkpoint) => Ok(checkpoint),
            LoadState::LoadFailed(e) => Err(e.clone()),
            LoadState::NotLoaded | LoadState::Loading => {
                unreachable!("load always ends in a terminal state")
            }
        }
    }

    fn acquire(&self, request: &LoadRequest) -> Result<LoadedCheckpoint, HarnessError> {
        if request.trust_remote_code {
            warn!(
                "Remote code trust enabled for '{}': checkpoint-declared custom code is accepted",
                request.model_id
            );
        }

        info!(
            "Loading '{}' via {} ({}, quantization: {})",
            request.model_id,
            self.backend.name(),
            request.device,
            request
                .quantization
                .as_ref()
                .map(|q| format!("{}-bit {}", q.bits, q.quant_scheme))
                .unwrap_or_else(|| "off".to_string()),
        );
        let start = Instant::now();

        let tokenizer = self
            .backend
            .load_tokenizer(request)
            .map_err(|e| HarnessError::load(&request.model_id, LoadStage::Tokenizer, &e))?;

        let model = self
            .backend
            .load_model(request)
            .map_err(|e| HarnessError::load(&request.model_id, LoadStage::Model, &e))?;

        info!("Checkpoint loaded in {:.2?}", start.elapsed());
        Ok(LoadedCheckpoint { tokenizer, model })
    }
}
