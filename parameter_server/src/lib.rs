pub mod aggregation;
pub mod initialization;
pub mod optimization;
pub mod storage;

pub use aggregation::{AggregatedGradients, GradientAggregator, Histogram};
pub use optimization::{Optimizer, OptimizerKind, OptimizerState};
pub use storage::{ParamSnapshot, ParameterStore, Result, StoreErr};
