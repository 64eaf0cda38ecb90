mod dataset;
mod settings;
mod training;

pub use dataset::DatasetConfig;
pub use settings::RunSettings;
pub use training::{RestoreMode, TrainingConfig};
