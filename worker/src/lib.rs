pub mod chunk;
pub mod data;
pub mod device;
pub mod error;
pub mod metrics;
pub mod report;
pub mod step;
pub mod tower;
pub mod validation;

pub use chunk::{ChunkPlan, ChunkSplitter, split};
pub use device::{Device, DevicePool};
pub use error::{Result, WorkerErr};
pub use metrics::ConfusionMatrix;
pub use report::{LogReporter, NullReporter, Reporter};
pub use step::{InferenceOutput, StepExecutor, StepOutput, TrainingState};
pub use tower::{Tower, TowerBuilder};
pub use validation::{ArtifactOptions, ValidationPhase, ValidationRunner};
