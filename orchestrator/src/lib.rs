pub mod checkpoint;
pub mod configs;
pub mod error;
mod session;
pub mod training_loop;

use machine_learning::arch::Model;
use worker::data::DatasetProvider;

pub use checkpoint::CheckpointStore;
pub use configs::{DatasetConfig, RestoreMode, RunSettings, TrainingConfig};
pub use error::{OrchestratorError, Result};
pub use session::Session;
pub use training_loop::{
    Evaluator, LoopState, Schedule, SetEvaluator, Termination, TrainingLoop, TrainingOutcome,
};

/// Validates `config` and runs it to completion.
///
/// # Errors
/// Returns an `OrchestratorError` if the configuration is invalid or the run
/// hits a fatal error.
pub fn train<M: Model>(
    config: TrainingConfig,
    model: M,
    provider: &dyn DatasetProvider,
) -> Result<TrainingOutcome> {
    Session::new(config, model, provider)?.run()
}
