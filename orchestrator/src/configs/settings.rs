use std::path::PathBuf;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::TrainingConfig;
use crate::{OrchestratorError, Result};

/// Options that control how a run is executed rather than what it learns.
/// They are left out of the configuration hash so changing them resumes
/// the same experiment.
const RUN_CONTROL: &[&str] = &[
    "checkpoints_basedir",
    "checkpoints_to_keep",
    "devices",
    "do_validation_only",
    "max_epochs",
    "min_epochs",
    "nthreads",
    "patience",
    "queue_size",
    "restore_model",
    "use_threads",
    "val_every_epochs",
    "val_on_sets",
    "val_skip_first",
];

/// The settings derived from a `TrainingConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Validate every this many epochs.
    pub val_every: usize,
    /// How many epoch ends to skip before the first validation.
    pub val_skip: usize,
    /// The hex sha-256 of the configuration, run control options excluded.
    pub hash: String,
    /// `<basedir>/[<suite>/]<model_name><suffix>/<hash>`
    pub checkpoint_dir: PathBuf,
}

impl TrainingConfig {
    /// Computes the settings that follow from this configuration.
    pub fn derive(&self) -> Result<RunSettings> {
        let val_every = self.val_every_epochs.max(1);
        let val_skip = if self.val_skip_first > 0 {
            self.val_skip_first
        } else {
            val_every - 1
        };

        let hash = self.hash()?;

        let mut checkpoint_dir = self.checkpoints_basedir.clone();
        if !self.suite_name.is_empty() {
            checkpoint_dir.push(&self.suite_name);
        }
        checkpoint_dir.push(format!("{}{}", self.model_name, self.model_suffix));
        checkpoint_dir.push(&hash);

        Ok(RunSettings {
            val_every,
            val_skip,
            hash,
            checkpoint_dir,
        })
    }

    /// Hashes the canonical json of this configuration. Object keys are
    /// sorted, so the hash doesn't depend on the order options were written in.
    fn hash(&self) -> Result<String> {
        let Value::Object(mut fields) = serde_json::to_value(self)? else {
            return Err(OrchestratorError::InvalidConfiguration(
                "the configuration must be a json object".into(),
            ));
        };

        for key in RUN_CONTROL {
            fields.remove(*key);
        }

        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&fields)?);
        Ok(format!("{:x}", hasher.finalize()))
    }
}
