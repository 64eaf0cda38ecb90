#![allow(dead_code)]

use std::io;

use machine_learning::{
    Gradient,
    arch::{BuilderError, Model, ParamInit, ParamSpec, loss::LossKind},
};
use ndarray::{ArrayD, ArrayViewD, IxDyn, array};
use parameter_server::{OptimizerKind, ParameterStore};
use rand::{SeedableRng, rngs::StdRng};
use worker::{DevicePool, StepExecutor, data::Batch};

/// Scores every location with its own input times a learnable scale.
///
/// Fed with one-hot inputs it predicts the hot class.
pub struct Scaled {
    pub nclasses: usize,
    /// Declares a second parameter the model never touches.
    pub with_unused: bool,
}

impl Model for Scaled {
    type Cache = ArrayD<f32>;

    fn params(&self) -> Vec<ParamSpec> {
        let mut specs =
            vec![ParamSpec::new("scale", vec![1], ParamInit::Const { value: 1. }).unregularized()];

        if self.with_unused {
            specs.push(ParamSpec::new("unused", vec![2], ParamInit::Const { value: 0. }));
        }

        specs
    }

    fn forward(
        &self,
        params: &[ArrayD<f32>],
        x: ArrayViewD<'_, f32>,
        _is_training: bool,
    ) -> Result<(ArrayD<f32>, Self::Cache), BuilderError> {
        let scale = params[0][[0]];
        Ok((&x * scale, x.to_owned()))
    }

    fn backward(
        &self,
        _params: &[ArrayD<f32>],
        cache: Self::Cache,
        d_out: ArrayViewD<'_, f32>,
    ) -> Result<Vec<Option<Gradient>>, BuilderError> {
        let d_scale = (&d_out * &cache).sum();
        let mut grads = vec![Some(Gradient::Dense(array![d_scale].into_dyn()))];

        if self.with_unused {
            grads.push(None);
        }

        Ok(grads)
    }
}

/// A model whose forward pass always fails.
pub struct Exploding;

impl Model for Exploding {
    type Cache = ();

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("w", vec![1], ParamInit::Const { value: 0. })]
    }

    fn forward(
        &self,
        _params: &[ArrayD<f32>],
        _x: ArrayViewD<'_, f32>,
        _is_training: bool,
    ) -> Result<(ArrayD<f32>, Self::Cache), BuilderError> {
        Err(Box::new(io::Error::other("model exploded")))
    }

    fn backward(
        &self,
        _params: &[ArrayD<f32>],
        _cache: Self::Cache,
        _d_out: ArrayViewD<'_, f32>,
    ) -> Result<Vec<Option<Gradient>>, BuilderError> {
        Ok(vec![None])
    }
}

/// Builds a batch of one-hot inputs, `hot[i][j]` being the hot class of
/// location `j` of sample `i`, and labels `labels[i][j]`.
///
/// Hot classes `>= nclasses` give all zero inputs.
pub fn one_hot_batch(hot: &[Vec<usize>], labels: &[Vec<usize>], nclasses: usize) -> Batch {
    let n = hot.len();
    let locations = hot.first().map(Vec::len).unwrap_or_default();

    let inputs = ArrayD::from_shape_fn(IxDyn(&[n, locations, nclasses]), |ix| {
        f32::from(u8::from(hot[ix[0]][ix[1]] == ix[2]))
    });
    let labels = ArrayD::from_shape_fn(IxDyn(&[n, locations]), |ix| labels[ix[0]][ix[1]]);

    Batch::new(inputs, labels).unwrap()
}

/// A batch the `Scaled` model gets entirely right.
pub fn perfect_batch(labels: &[Vec<usize>], nclasses: usize) -> Batch {
    one_hot_batch(labels, labels, nclasses)
}

pub fn executor<M: Model>(
    model: M,
    devices: &[&str],
    optimizer: OptimizerKind,
    nclasses: usize,
) -> StepExecutor<M> {
    let specs = model.params();
    let store = ParameterStore::new(specs.clone(), &mut StdRng::seed_from_u64(11)).unwrap();
    let devices = DevicePool::new(devices).unwrap();

    StepExecutor::new(
        model,
        LossKind::default().build(),
        store,
        optimizer.build(&specs),
        devices,
        nclasses,
    )
    .unwrap()
}
