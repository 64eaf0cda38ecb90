use serde::{Deserialize, Serialize};

use super::{LossFn, Mse, SparseCrossEntropy, SparseSoftmaxCrossEntropy};

/// The losses a training run can be configured with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    #[serde(rename = "sparse_softmax_cross_entropy_with_logits")]
    SparseSoftmaxCrossEntropyWithLogits,
    SparseCrossEntropy,
    MeanSquaredError,
}

impl LossKind {
    /// Builds the loss function this kind names.
    pub fn build(self) -> Box<dyn LossFn> {
        match self {
            LossKind::SparseSoftmaxCrossEntropyWithLogits => Box::new(SparseSoftmaxCrossEntropy),
            LossKind::SparseCrossEntropy => Box::new(SparseCrossEntropy),
            LossKind::MeanSquaredError => Box::new(Mse::new()),
        }
    }
}
