use machine_learning::{Gradient, arch::ParamId};
use ndarray::Axis;
use rayon::prelude::*;

use super::{Optimizer, OptimizerState};
use crate::{
    aggregation::AggregatedGradients,
    storage::{ParameterStore, Result, StoreErr, check_shape},
};

#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(
        &mut self,
        store: &mut ParameterStore,
        grads: &AggregatedGradients,
    ) -> Result<()> {
        let lr = self.learning_rate;
        let (specs, values) = store.parts_mut();

        values
            .par_iter_mut()
            .zip(specs.par_iter())
            .enumerate()
            .try_for_each(|(i, (param, spec))| {
                let Some(grad) = grads.get(ParamId(i)) else {
                    return Ok(());
                };
                check_shape(spec, grad.shape())?;

                match grad {
                    Gradient::Dense(g) => param.zip_mut_with(g, |p, &g| *p -= lr * g),
                    Gradient::Sparse(g) => {
                        for (&row, g) in g.indices().iter().zip(g.values().outer_iter()) {
                            param
                                .index_axis_mut(Axis(0), row)
                                .zip_mut_with(&g, |p, &g| *p -= lr * g);
                        }
                    }
                }

                Ok::<_, StoreErr>(())
            })
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::GradientDescent
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::GradientDescent => Ok(()),
            _ => Err(StoreErr::IncompatibleState("expected a gradient descent state")),
        }
    }
}
