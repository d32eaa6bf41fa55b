use anyhow::{anyhow, Context, Result};
use hf_hub::api::sync::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

/// Builds the hub client. Credentials come from `HF_TOKEN` when set,
/// otherwise from the hub's own token file.
pub fn build_api(cache_dir: Option<&Path>) -> Result<Api> {
    let mut builder = ApiBuilder::new().with_progress(false);
    if let Some(dir) = cache_dir {
        builder = builder.with_cache_dir(dir.to_path_buf());
    }
    if let Ok(token) = std::env::var(HF_TOKEN_ENV) {
        if !token.trim().is_empty() {
            builder = builder.with_token(Some(token));
        }
    }
    builder.build().context("building Hugging Face hub client")
}

/// A model repository on the hub, pinned to a revision when one is given.
pub struct HubCheckpoint {
    model_id: String,
    repo: ApiRepo,
}

impl HubCheckpoint {
    pub fn open(api: &Api, model_id: &str, revision: Option<&str>) -> Self {
        let repo = match revision {
            Some(rev) => api.repo(Repo::with_revision(
                model_id.to_string(),
                RepoType::Model,
                rev.to_string(),
            )),
            None => api.model(model_id.to_string()),
        };
        Self {
            model_id: model_id.to_string(),
            repo,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Downloads (or reuses from cache) one file of the repo.
    pub fn get(&self, file: &str) -> Result<PathBuf> {
        debug!("Fetching {} from {}", file, self.model_id);
        self.repo
            .get(file)
            .with_context(|| format!("fetching {} from {}", file, self.model_id))
    }

    /// Every file name listed in the repo.
    pub fn files(&self) -> Result<Vec<String>> {
        let info = self
            .repo
            .info()
            .with_context(|| format!("listing files of {}", self.model_id))?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    pub fn config_json(&self) -> Result<serde_json::Value> {
        let path = self.get("config.json")?;
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).with_context(|| format!("parsing {:?}", path))
    }

    /// Safetensors weight files, following the shard index when the
    /// checkpoint is split.
    pub fn safetensors(&self) -> Result<Vec<PathBuf>> {
        let index_path = match self.get("model.safetensors.index.json") {
            Ok(path) => path,
            Err(e) => {
                debug!("No shard index ({:#}); trying single model.safetensors", e);
                return Ok(vec![self.get("model.safetensors")?]);
            }
        };

        let content = std::fs::read_to_string(&index_path)?;
        let index: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("parsing {:?}", index_path))?;
        let shards = shard_files(&index)
            .ok_or_else(|| anyhow!("{:?} has no weight_map", index_path))?;

        shards.iter().map(|file| self.get(file)).collect()
    }
}

/// Distinct shard file names referenced by a safetensors index, in order.
pub fn shard_files(index: &serde_json::Value) -> Option<Vec<String>> {
    let weight_map = index.get("weight_map")?.as_object()?;
    let mut files: Vec<String> = weight_map
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    files.sort();
    files.dedup();
    Some(files)
}
