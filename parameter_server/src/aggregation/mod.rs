mod aggregator;
mod histogram;

pub use aggregator::{AggregatedGradients, GradientAggregator};
pub use histogram::Histogram;
