use log::{info, trace};
use parameter_server::Histogram;

/// Receives the metrics emitted while training and validating.
///
/// Reporting is best effort: implementations must not fail or block the caller.
pub trait Reporter: Send + Sync {
    /// Records a scalar, such as the loss of a step.
    fn scalar(&self, tag: &str, step: u64, value: f64);

    /// Records the distribution of the aggregated gradient of `param`.
    fn gradient_histogram(&self, param: &str, step: u64, histogram: &Histogram);

    /// Records the mean IoU of a validation pass over `set`.
    fn validation(&self, set: &str, epoch: usize, miou: f64);
}

/// A `Reporter` that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn scalar(&self, _tag: &str, _step: u64, _value: f64) {}

    fn gradient_histogram(&self, _param: &str, _step: u64, _histogram: &Histogram) {}

    fn validation(&self, _set: &str, _epoch: usize, _miou: f64) {}
}

/// A `Reporter` that writes every record through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn scalar(&self, tag: &str, step: u64, value: f64) {
        trace!(tag = tag, step = step, value = value; "scalar");
    }

    fn gradient_histogram(&self, param: &str, step: u64, histogram: &Histogram) {
        trace!(
            param = param,
            step = step,
            min = histogram.min,
            max = histogram.max,
            mean = histogram.mean;
            "gradient histogram {:?}",
            histogram.counts
        );
    }

    fn validation(&self, set: &str, epoch: usize, miou: f64) {
        info!(set = set, epoch = epoch; "Mean Class IoU - {set} {miou:.5}");
    }
}
