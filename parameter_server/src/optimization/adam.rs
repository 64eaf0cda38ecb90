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
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Vec<ArrayD<f32>>,
    s: Vec<ArrayD<f32>>,
    epsilon: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `specs` - The parameters this instance should hold moments for.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(
        specs: &[ParamSpec],
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: zeroed_slots(specs),
            s: zeroed_slots(specs),
            epsilon,
        }
    }
}

impl Optimizer for Adam {
    fn update_params(
        &mut self,
        store: &mut ParameterStore,
        grads: &AggregatedGradients,
    ) -> Result<()> {
        let (specs, values) = store.parts_mut();
        check_slots(&self.v, values)?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        let step = |p: &mut f32, v: &mut f32, s: &mut f32, &g: &f32| {
            *v = b1 * *v + (1. - b1) * g;
            *s = b2 * *s + (1. - b2) * g.powi(2);
            *p -= step_size * *v / (s.sqrt() + eps);
        };

        values
            .par_iter_mut()
            .zip(self.v.par_iter_mut())
            .zip(self.s.par_iter_mut())
            .zip(specs.par_iter())
            .enumerate()
            .try_for_each(|(i, (((param, v), s), spec))| {
                let Some(grad) = grads.get(ParamId(i)) else {
                    return Ok(());
                };

                match prepare(spec, grad)? {
                    Gradient::Dense(g) => Zip::from(param).and(v).and(s).and(&g).for_each(step),
                    Gradient::Sparse(g) => {
                        for (&row, g) in g.indices().iter().zip(g.values().outer_iter()) {
                            Zip::from(param.index_axis_mut(Axis(0), row))
                                .and(v.index_axis_mut(Axis(0), row))
                                .and(s.index_axis_mut(Axis(0), row))
                                .and(&g)
                                .for_each(step);
                        }
                    }
                }

                Ok::<_, StoreErr>(())
            })
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Adam {
            beta1_t: self.beta1_t,
            beta2_t: self.beta2_t,
            v: self.v.clone(),
            s: self.s.clone(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        let OptimizerState::Adam {
            beta1_t,
            beta2_t,
            v,
            s,
        } = state
        else {
            return Err(StoreErr::IncompatibleState("expected an adam state"));
        };

        check_slots(&self.v, &v)?;
        check_slots(&self.s, &s)?;

        self.beta1_t = beta1_t;
        self.beta2_t = beta2_t;
        self.v = v;
        self.s = s;
        Ok(())
    }
}
