use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::models::{GenerationParams, Placement};

pub const MODEL_ID_ENV: &str = "MODEL_ID";
pub const SETTINGS_FILE_NAME: &str = "modelcheck.toml";

/// Named bundle of defaults. `Full` targets ~7B checkpoints on a GPU;
/// `Quick` is the lightweight variant for small models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Full,
    Quick,
}

impl Preset {
    pub fn default_model_id(&self) -> &'static str {
        match self {
            Preset::Full => "deepseek-ai/DeepSeek-R1-Distill-Qwen-7B",
            Preset::Quick => "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        }
    }

    /// Companion repository with pre-quantized GGUF weights for the default
    /// model, when the default model does not ship any itself.
    pub fn default_gguf_model_id(&self) -> Option<&'static str> {
        match self {
            Preset::Full => Some("bartowski/DeepSeek-R1-Distill-Qwen-7B-GGUF"),
            Preset::Quick => None,
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            Preset::Full => "Explain the concept of phase transitions in simple terms.",
            Preset::Quick => "Explain the water cycle in simple terms.",
        }
    }

    pub fn max_new_tokens(&self) -> usize {
        match self {
            Preset::Full => 150,
            Preset::Quick => 50,
        }
    }

    /// Whether this preset asks for 4-bit loading at all.
    pub fn requests_quantization(&self) -> bool {
        matches!(self, Preset::Full)
    }

    pub fn placement(&self) -> Placement {
        match self {
            Preset::Full => Placement::Automatic,
            Preset::Quick => Placement::Fixed,
        }
    }
}

/// Optional settings file. Every field may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model_id: Option<String>,
    pub preset: Option<Preset>,
    pub auto_simulate: Option<bool>,
    pub generation: GenerationSettings,
    pub loading: LoadingSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_new_tokens: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadingSettings {
    pub trust_remote_code: Option<bool>,
    pub revision: Option<String>,
    /// Repository searched for pre-quantized 4-bit weights.
    pub gguf_model_id: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Settings {
    /// Loads `explicit` if given (it must exist), otherwise the first of
    /// `./modelcheck.toml` and `<config dir>/modelcheck/config.toml` that exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let mut candidates = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(SETTINGS_FILE_NAME));
        }
        if let Some(dir) = crate::utils::paths::config_dir() {
            candidates.push(dir.join("config.toml"));
        }

        for path in candidates {
            if path.exists() {
                return Self::from_file(&path);
            }
            debug!("No settings file at {:?}", path);
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Explicit command-line values. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub simulate: bool,
    pub no_quant: bool,
    pub preset: Option<Preset>,
    pub max_new_tokens: Option<usize>,
    pub trust_remote_code: bool,
    pub auto_simulate: bool,
    pub revision: Option<String>,
    pub gguf_model: Option<String>,
}

/// The single immutable configuration of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub model_id: String,
    pub simulate: bool,
    pub disable_quantization: bool,
    pub preset: Preset,
    pub prompt: String,
    pub generation: GenerationParams,
    pub trust_remote_code: bool,
    /// Degrade to the simulated answer instead of failing when capabilities are missing.
    pub auto_simulate: bool,
    pub revision: Option<String>,
    pub gguf_model_id: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Resolves against the process environment.
    pub fn from_env(cli: &CliOverrides, settings: &Settings) -> Result<Self, ConfigError> {
        Self::resolve(cli, settings, std::env::var(MODEL_ID_ENV).ok())
    }

    /// Model id precedence: CLI > `MODEL_ID` > settings file > preset default.
    pub fn resolve(
        cli: &CliOverrides,
        settings: &Settings,
        env_model_id: Option<String>,
    ) -> Result<Self, ConfigError> {
        let preset = cli.preset.or(settings.preset).unwrap_or_default();

        let model_id = cli
            .model
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| env_model_id.filter(|id| !id.trim().is_empty()))
            .or_else(|| settings.model_id.clone())
            .unwrap_or_else(|| preset.default_model_id().to_string());

        let generation = GenerationParams {
            max_new_tokens: cli
                .max_new_tokens
                .or(settings.generation.max_new_tokens)
                .unwrap_or_else(|| preset.max_new_tokens()),
            do_sample: true,
            temperature: settings.generation.temperature.unwrap_or(0.7),
            top_p: settings.generation.top_p,
            seed: settings.generation.seed,
        };
        // A simulated run never generates, so its bounds are not checked.
        if !cli.simulate {
            validate_generation(&generation)?;
        }

        let gguf_model_id = cli
            .gguf_model
            .clone()
            .or_else(|| settings.loading.gguf_model_id.clone())
            .or_else(|| {
                if model_id == preset.default_model_id() {
                    preset.default_gguf_model_id().map(str::to_string)
                } else {
                    None
                }
            })
            .filter(|id| !id.trim().is_empty());

        Ok(Self {
            model_id,
            simulate: cli.simulate,
            disable_quantization: cli.no_quant,
            preset,
            prompt: preset.prompt().to_string(),
            generation,
            trust_remote_code: cli.trust_remote_code
                || settings.loading.trust_remote_code.unwrap_or(false),
            auto_simulate: cli.auto_simulate || settings.auto_simulate.unwrap_or(false),
            revision: cli.revision.clone().or_else(|| settings.loading.revision.clone()),
            gguf_model_id,
            cache_dir: settings.loading.cache_dir.clone(),
        })
    }
}

fn validate_generation(params: &GenerationParams) -> Result<(), ConfigError> {
    if params.max_new_tokens == 0 {
        return Err(ConfigError::Invalid(
            "max_new_tokens must be greater than zero".to_string(),
        ));
    }
    if !(params.temperature > 0.0) {
        return Err(ConfigError::Invalid(format!(
            "temperature must be positive when sampling, got {}",
            params.temperature
        )));
    }
    if let Some(top_p) = params.top_p {
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "top_p must be in (0, 1], got {}",
                top_p
            )));
        }
    }
    Ok(())
}
