use serde::{Deserialize, Serialize};
use worker::data::{InMemoryDataset, InMemoryProvider};

use crate::{OrchestratorError, Result};

/// Where the samples of a run come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum DatasetConfig {
    /// Random images labelled by their largest channel, see `InMemoryDataset::synthetic`.
    Synthetic {
        train_samples: usize,
        valid_samples: usize,
        #[serde(default)]
        test_samples: usize,
        height: usize,
        width: usize,
        channels: usize,
    },
}

impl DatasetConfig {
    /// Returns the amount of channels of every location.
    pub fn channels(&self) -> usize {
        match self {
            DatasetConfig::Synthetic { channels, .. } => *channels,
        }
    }

    /// Returns the spatial shape of a sample.
    pub fn data_shape(&self) -> Vec<usize> {
        match self {
            DatasetConfig::Synthetic { height, width, .. } => vec![*height, *width],
        }
    }

    pub(super) fn validate(&self) -> Result<()> {
        match self {
            DatasetConfig::Synthetic {
                train_samples,
                valid_samples,
                height,
                width,
                channels,
                ..
            } => {
                if *train_samples == 0 || *valid_samples == 0 {
                    return Err(OrchestratorError::InvalidConfiguration(
                        "the train and valid sets need at least one sample".into(),
                    ));
                }

                if *height == 0 || *width == 0 || *channels == 0 {
                    return Err(OrchestratorError::InvalidConfiguration(
                        "samples need a positive height, width and channel count".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Builds the sets this dataset names: `train`, `valid` and, if it has samples, `test`.
    ///
    /// # Arguments
    /// * `batch_size` - The amount of samples per batch.
    /// * `nclasses` - The amount of classes.
    /// * `seed` - The seed of the train set, the other sets derive theirs from it.
    ///
    /// # Returns
    /// A provider serving every set.
    pub fn provider(
        &self,
        batch_size: usize,
        nclasses: usize,
        seed: u64,
    ) -> Result<InMemoryProvider> {
        match self {
            DatasetConfig::Synthetic {
                train_samples,
                valid_samples,
                test_samples,
                height,
                width,
                channels,
            } => {
                let shape = [*height, *width];
                let set = |samples: usize, seed: u64| {
                    InMemoryDataset::synthetic(
                        samples, &shape, *channels, nclasses, batch_size, seed,
                    )
                };

                let mut provider = InMemoryProvider::new()
                    .with_set("train", set(*train_samples, seed)?)
                    .with_set("valid", set(*valid_samples, seed.wrapping_add(1))?);

                if *test_samples > 0 {
                    let test = set(*test_samples, seed.wrapping_add(2))?;
                    provider = provider.with_set("test", test);
                }

                Ok(provider)
            }
        }
    }
}
