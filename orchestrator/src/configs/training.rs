use std::{
    fs,
    path::{Path, PathBuf},
};

use machine_learning::arch::loss::LossKind;
use parameter_server::OptimizerKind;
use serde::{Deserialize, Serialize};

use super::DatasetConfig;
use crate::{OrchestratorError, Result};

/// Which checkpoint a run starts from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    /// Always start from freshly initialized parameters.
    None,
    /// The most recent rolling checkpoint.
    #[default]
    Latest,
    /// The checkpoint with the best validation score.
    Best,
}

/// Every recognized option of a training run.
///
/// `dataset`, `devices`, `batch_size` and `nclasses` are required, every
/// other option falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    pub dataset: DatasetConfig,
    pub devices: Vec<String>,
    pub batch_size: usize,
    /// The amount of non void classes, labels above it are ignored.
    pub nclasses: usize,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub model_suffix: String,
    #[serde(default)]
    pub suite_name: String,
    #[serde(default = "default_checkpoints_basedir")]
    pub checkpoints_basedir: PathBuf,
    /// How many rolling checkpoints to keep, 0 keeps them all.
    #[serde(default = "default_checkpoints_to_keep")]
    pub checkpoints_to_keep: usize,
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    #[serde(default = "default_min_epochs")]
    pub min_epochs: usize,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_val_every_epochs")]
    pub val_every_epochs: usize,
    #[serde(default)]
    pub val_skip_first: usize,
    #[serde(default = "default_val_on_sets")]
    pub val_on_sets: Vec<String>,
    #[serde(default)]
    pub weight_decay: f32,
    #[serde(default)]
    pub optimizer: OptimizerKind,
    #[serde(default)]
    pub loss_fn: LossKind,
    #[serde(default)]
    pub use_threads: bool,
    #[serde(default = "default_nthreads")]
    pub nthreads: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default)]
    pub restore_model: RestoreMode,
    #[serde(default)]
    pub do_validation_only: bool,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default)]
    pub save_samples: bool,
    #[serde(default)]
    pub save_heatmap: bool,
    /// Buckets of the per parameter gradient histograms, 0 disables them.
    #[serde(default)]
    pub gradient_histogram_buckets: usize,
}

fn default_model_name() -> String {
    "my_model".to_string()
}

fn default_checkpoints_basedir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_checkpoints_to_keep() -> usize {
    2
}

fn default_max_epochs() -> usize {
    100
}

fn default_min_epochs() -> usize {
    1
}

fn default_patience() -> usize {
    10
}

fn default_val_every_epochs() -> usize {
    1
}

fn default_val_on_sets() -> Vec<String> {
    vec!["valid".to_string()]
}

fn default_nthreads() -> usize {
    2
}

fn default_queue_size() -> usize {
    8
}

fn default_random_seed() -> u64 {
    8112017
}

impl TrainingConfig {
    /// Parses a configuration from its json representation.
    ///
    /// # Returns
    /// The configuration or `InvalidConfiguration` if it's malformed, misses
    /// a required option or names an unknown one.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| OrchestratorError::InvalidConfiguration(e.to_string()))
    }

    /// Reads and parses the configuration file at `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Checks every option once, before anything is built.
    ///
    /// # Returns
    /// An `InvalidConfiguration` error describing the first bad option found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(OrchestratorError::InvalidConfiguration(msg.to_string()));

        if self.devices.is_empty() {
            return invalid("at least one device is required");
        }

        if self.batch_size < self.devices.len() {
            return Err(OrchestratorError::InvalidConfiguration(format!(
                "a batch size of {} can't feed {} devices",
                self.batch_size,
                self.devices.len()
            )));
        }

        if self.nclasses == 0 {
            return invalid("nclasses must be positive");
        }

        if self.model_name.is_empty() {
            return invalid("model_name can't be empty");
        }

        if self.max_epochs == 0 {
            return invalid("max_epochs must be positive");
        }

        if self.min_epochs > self.max_epochs {
            return invalid("min_epochs can't be greater than max_epochs");
        }

        if self.patience == 0 {
            return invalid("patience must be positive");
        }

        if self.val_on_sets.is_empty() {
            return invalid("val_on_sets can't be empty");
        }

        if !self.do_validation_only && !self.val_on_sets.iter().any(|set| set == "valid") {
            return invalid("val_on_sets must include the valid set to track the best model");
        }

        if !self.weight_decay.is_finite() || self.weight_decay < 0. {
            return invalid("weight_decay must be finite and non negative");
        }

        if let Some(reason) = self.optimizer.check() {
            return invalid(reason);
        }

        if self.use_threads && (self.nthreads == 0 || self.queue_size == 0) {
            return invalid("prefetching needs positive nthreads and queue_size");
        }

        self.dataset.validate()
    }
}
