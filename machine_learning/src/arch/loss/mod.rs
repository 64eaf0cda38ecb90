mod cross_entropy;
mod kind;
mod loss_fn;
mod mse;

pub use cross_entropy::{SparseCrossEntropy, SparseSoftmaxCrossEntropy};
pub use kind::LossKind;
pub use loss_fn::LossFn;
pub use mse::Mse;
