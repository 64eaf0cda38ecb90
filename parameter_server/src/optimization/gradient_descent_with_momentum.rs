use machine_learning::{
    Gradient,
    arch::{ParamId, ParamSpec},
};
use ndarray::{ArrayD, Axis, Zip};
use rayon::prelude::*;

use super::{
    Optimizer, OptimizerState,
    optimizer::{check_slots, prepare, zeroed_slots},
};
use crate::{
    aggregation::AggregatedGradients,
    storage::{ParameterStore, Result, StoreErr},
};

#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<ArrayD<f32>>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `specs` - The parameters this instance should hold a velocity for.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(specs: &[ParamSpec], learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: zeroed_slots(specs),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(
        &mut self,
        store: &mut ParameterStore,
        grads: &AggregatedGradients,
    ) -> Result<()> {
        let lr = self.learning_rate;
        let mu = self.momentum;
        let (specs, values) = store.parts_mut();

        check_slots(&self.velocity, values)?;

        values
            .par_iter_mut()
            .zip(self.velocity.par_iter_mut())
            .zip(specs.par_iter())
            .enumerate()
            .try_for_each(|(i, ((param, velocity), spec))| {
                let Some(grad) = grads.get(ParamId(i)) else {
                    return Ok(());
                };

                let step = |p: &mut f32, v: &mut f32, &g: &f32| {
                    *v = (mu * *v) + g;
                    *p -= lr * *v;
                };

                match prepare(spec, grad)? {
                    Gradient::Dense(g) => Zip::from(param).and(velocity).and(&g).for_each(step),
                    Gradient::Sparse(g) => {
                        for (&row, g) in g.indices().iter().zip(g.values().outer_iter()) {
                            Zip::from(param.index_axis_mut(Axis(0), row))
                                .and(velocity.index_axis_mut(Axis(0), row))
                                .and(&g)
                                .for_each(step);
                        }
                    }
                }

                Ok::<_, StoreErr>(())
            })
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Momentum {
            velocity: self.velocity.clone(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        let OptimizerState::Momentum { velocity } = state else {
            return Err(StoreErr::IncompatibleState("expected a momentum state"));
        };

        check_slots(&self.velocity, &velocity)?;
        self.velocity = velocity;
        Ok(())
    }
}
