#![allow(dead_code)]

use std::{collections::VecDeque, io};

use machine_learning::{
    Gradient,
    arch::{BuilderError, Model, ParamInit, ParamSpec, loss::LossKind},
};
use ndarray::{ArrayD, ArrayViewD, array};
use orchestrator::{Evaluator, OrchestratorError, Result, Schedule};
use parameter_server::{OptimizerKind, ParameterStore};
use rand::{SeedableRng, rngs::StdRng};
use worker::{
    DevicePool, StepExecutor,
    data::{BatchQueue, InMemoryDataset},
};

pub const NCLASSES: usize = 2;

/// Scores every location with its own input times a learnable scale.
pub struct Scaled;

impl Model for Scaled {
    type Cache = ArrayD<f32>;

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("scale", vec![1], ParamInit::Const { value: 1. }).unregularized()]
    }

    fn forward(
        &self,
        params: &[ArrayD<f32>],
        x: ArrayViewD<'_, f32>,
        _is_training: bool,
    ) -> std::result::Result<(ArrayD<f32>, Self::Cache), BuilderError> {
        Ok((&x * params[0][[0]], x.to_owned()))
    }

    fn backward(
        &self,
        _params: &[ArrayD<f32>],
        cache: Self::Cache,
        d_out: ArrayViewD<'_, f32>,
    ) -> std::result::Result<Vec<Option<Gradient>>, BuilderError> {
        let d_scale = (&d_out * &cache).sum();
        Ok(vec![Some(Gradient::Dense(array![d_scale].into_dyn()))])
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
    ) -> std::result::Result<(ArrayD<f32>, Self::Cache), BuilderError> {
        Err(Box::new(io::Error::other("model exploded")))
    }

    fn backward(
        &self,
        _params: &[ArrayD<f32>],
        _cache: Self::Cache,
        _d_out: ArrayViewD<'_, f32>,
    ) -> std::result::Result<Vec<Option<Gradient>>, BuilderError> {
        Ok(vec![None])
    }
}

/// Hands out a fixed sequence of validation scores.
#[derive(Default)]
pub struct Scripted {
    scores: VecDeque<f64>,
    pub calls: Vec<(String, usize)>,
}

impl Scripted {
    pub fn new(scores: &[f64]) -> Self {
        Self {
            scores: scores.iter().copied().collect(),
            calls: Vec::new(),
        }
    }
}

impl<M: Model> Evaluator<M> for Scripted {
    fn evaluate(&mut self, _executor: &StepExecutor<M>, set: &str, epoch: usize) -> Result<f64> {
        self.calls.push((set.to_string(), epoch));
        self.scores.pop_front().ok_or_else(|| {
            OrchestratorError::InvalidConfiguration("ran out of scripted scores".to_string())
        })
    }
}

pub fn executor<M: Model>(model: M, devices: &[&str]) -> StepExecutor<M> {
    let specs = model.params();
    let store = ParameterStore::new(specs.clone(), &mut StdRng::seed_from_u64(3)).unwrap();
    let optimizer = OptimizerKind::GradientDescent { lr: 0.01 }.build(&specs);

    StepExecutor::new(
        model,
        LossKind::default().build(),
        store,
        optimizer,
        DevicePool::new(devices).unwrap(),
        NCLASSES,
    )
    .unwrap()
}

/// A train set of `samples` random samples of 3 locations each.
pub fn train_queue(samples: usize, batch_size: usize) -> BatchQueue {
    let dataset = InMemoryDataset::synthetic(samples, &[3], NCLASSES, NCLASSES, batch_size, 5);
    BatchQueue::synchronous(Box::new(dataset.unwrap()))
}

pub fn schedule(max_epochs: usize, min_epochs: usize, patience: usize) -> Schedule {
    Schedule {
        max_epochs,
        min_epochs,
        patience,
        val_every: 1,
        val_skip: 0,
    }
}
