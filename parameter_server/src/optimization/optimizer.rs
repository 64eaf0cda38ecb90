use machine_learning::{Gradient, arch::ParamSpec};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::{
    aggregation::AggregatedGradients,
    storage::{ParameterStore, Result, StoreErr, check_shape},
};

/// Defines the strategy for updating model parameters based on aggregated gradients.
///
/// It is the only writer of the values held by a `ParameterStore`.
pub trait Optimizer: Send {
    /// Applies one update to every parameter that has an aggregated gradient.
    ///
    /// Parameters without an entry in `grads` are left untouched, including
    /// their optimizer state.
    ///
    /// # Arguments
    /// * `store` - The parameters to update.
    /// * `grads` - The gradients of this step.
    ///
    /// # Returns
    /// An error if some gradient doesn't fit its parameter.
    fn update_params(&mut self, store: &mut ParameterStore, grads: &AggregatedGradients)
    -> Result<()>;

    /// Returns a copy of the internal state, for checkpointing.
    fn state(&self) -> OptimizerState;

    /// Replaces the internal state with one previously returned by `state`.
    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}

/// The checkpointable state of every optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerState {
    GradientDescent,
    Momentum {
        velocity: Vec<ArrayD<f32>>,
    },
    Adam {
        beta1_t: f32,
        beta2_t: f32,
        v: Vec<ArrayD<f32>>,
        s: Vec<ArrayD<f32>>,
    },
}

/// Allocates one zeroed slot per parameter.
pub(super) fn zeroed_slots(specs: &[ParamSpec]) -> Vec<ArrayD<f32>> {
    specs
        .iter()
        .map(|spec| ArrayD::zeros(IxDyn(&spec.shape)))
        .collect()
}

/// Checks that loaded slots have the amount and shapes of `current`.
pub(super) fn check_slots(current: &[ArrayD<f32>], loaded: &[ArrayD<f32>]) -> Result<()> {
    if current.len() != loaded.len() {
        return Err(StoreErr::SizeMismatch {
            what: "optimizer slots",
            got: loaded.len(),
            expected: current.len(),
        });
    }

    if current
        .iter()
        .zip(loaded)
        .any(|(a, b)| a.shape() != b.shape())
    {
        return Err(StoreErr::IncompatibleState("slot shapes differ"));
    }

    Ok(())
}

/// Validates `grad` against the parameter it updates.
///
/// Stateful optimizers need each touched row exactly once, so sparse gradients
/// are coalesced here.
pub(super) fn prepare(spec: &ParamSpec, grad: &Gradient) -> Result<Gradient> {
    check_shape(spec, grad.shape())?;

    Ok(match grad {
        Gradient::Dense(_) => grad.clone(),
        Gradient::Sparse(sparse) => Gradient::Sparse(sparse.coalesce()),
    })
}
