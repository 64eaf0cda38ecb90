use std::{sync::Arc, time::Instant};

use log::debug;
use machine_learning::arch::{Model, loss::LossFn};
use ndarray::{Array1, ArrayD, ArrayView1, Axis, IxDyn, concatenate};
use parameter_server::{
    AggregatedGradients, GradientAggregator, Optimizer, OptimizerState, ParamSnapshot,
    ParameterStore,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    ChunkPlan, DevicePool, NullReporter, Reporter, Result, Tower, TowerBuilder, WorkerErr,
    data::Batch,
};

/// What a training step returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// The mean loss across the towers that received samples.
    pub loss: f32,
    /// Whether the parameters were updated.
    pub updated: bool,
}

/// What an inference step returns.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    /// The predicted class of every location, shaped like the labels of the batch.
    pub predictions: ArrayD<usize>,
    /// The probability of the predicted class of every location.
    pub confidence: ArrayD<f32>,
    pub loss: f32,
}

/// Everything needed to resume training: parameters, optimizer state and step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub global_step: u64,
    pub params: ParamSnapshot,
    pub optimizer: OptimizerState,
}

/// Runs data parallel steps over a set of devices.
///
/// Steps take `&mut self` to train and `&self` to infer, so there can never
/// be two steps in flight against the same parameters.
pub struct StepExecutor<M: Model> {
    model: M,
    loss_fn: Box<dyn LossFn>,
    store: ParameterStore,
    optimizer: Box<dyn Optimizer>,
    aggregator: GradientAggregator,
    devices: DevicePool,
    reporter: Arc<dyn Reporter>,
    nclasses: usize,
    weight_decay: f32,
    global_step: u64,
}

impl<M: Model> StepExecutor<M> {
    /// Creates a new `StepExecutor`.
    ///
    /// # Arguments
    /// * `model` - The model builder.
    /// * `loss_fn` - The per-location loss.
    /// * `store` - The initial parameter values, declared by `model`.
    /// * `optimizer` - The optimizer, sized for `store`.
    /// * `devices` - The devices every step is split across.
    /// * `nclasses` - The amount of non void classes.
    ///
    /// # Returns
    /// The executor or `InvalidConfiguration` if `store` doesn't hold the parameters of `model`.
    pub fn new(
        model: M,
        loss_fn: Box<dyn LossFn>,
        store: ParameterStore,
        optimizer: Box<dyn Optimizer>,
        devices: DevicePool,
        nclasses: usize,
    ) -> Result<Self> {
        let declared = model.params();
        if declared.as_slice() != store.specs() {
            return Err(WorkerErr::InvalidConfiguration(
                "the parameter store doesn't match the parameters of the model".to_string(),
            ));
        }

        Ok(Self {
            model,
            loss_fn,
            store,
            optimizer,
            aggregator: GradientAggregator::default(),
            devices,
            reporter: Arc::new(NullReporter),
            nclasses,
            weight_decay: 0.,
            global_step: 0,
        })
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Enables gradient histograms with `buckets` buckets.
    pub fn with_histograms(mut self, buckets: usize) -> Self {
        self.aggregator = GradientAggregator::new(buckets);
        self
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn devices(&self) -> &DevicePool {
        &self.devices
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn nclasses(&self) -> usize {
        self.nclasses
    }

    /// Runs one forward and backward pass and updates the parameters exactly once.
    ///
    /// # Arguments
    /// * `batch` - The batch to train on.
    /// * `plan` - How to split `batch` across the devices.
    ///
    /// # Returns
    /// The mean loss across towers, or the first error of any tower.
    pub fn run_training_step(&mut self, batch: &Batch, plan: &ChunkPlan) -> Result<StepOutput> {
        let start = Instant::now();
        let towers = self.run_towers(batch, plan, true)?;

        let grads = self
            .aggregator
            .aggregate(towers.iter().filter_map(|tower| tower.gradients.as_deref()))?;

        self.optimizer.update_params(&mut self.store, &grads)?;
        self.global_step += 1;

        let loss = mean_loss(&towers);
        self.report(loss, &grads);

        debug!(
            step = self.global_step,
            loss = loss,
            towers = towers.len(),
            elapsed_ms = start.elapsed().as_millis() as u64;
            "training step"
        );

        Ok(StepOutput {
            loss,
            updated: true,
        })
    }

    /// Runs one forward pass, without touching the parameters.
    ///
    /// # Returns
    /// The predictions of every device concatenated in batch order, and the mean loss.
    pub fn run_inference_step(&self, batch: &Batch, plan: &ChunkPlan) -> Result<InferenceOutput> {
        let towers = self.run_towers(batch, plan, false)?;
        let shape = batch.labels().shape();

        let predictions: Vec<_> = towers.iter().map(|tower| tower.predictions.view()).collect();
        let confidence: Vec<_> = towers.iter().map(|tower| tower.confidence.view()).collect();

        let predictions = join(&predictions, shape)?;
        let confidence = join(&confidence, shape)?;

        Ok(InferenceOutput {
            predictions,
            confidence,
            loss: mean_loss(&towers),
        })
    }

    /// Returns a copy of everything a checkpoint needs.
    pub fn training_state(&self) -> TrainingState {
        TrainingState {
            global_step: self.global_step,
            params: self.store.snapshot(),
            optimizer: self.optimizer.state(),
        }
    }

    /// Resumes from a previously saved `TrainingState`.
    ///
    /// On error the executor keeps its current state.
    pub fn restore(&mut self, state: TrainingState) -> Result<()> {
        let mut store = self.store.clone();
        store.restore(state.params)?;
        self.optimizer.load_state(state.optimizer)?;

        self.store = store;
        self.global_step = state.global_step;
        Ok(())
    }

    /// Builds one tower per device that received samples, in device order.
    fn run_towers(
        &self,
        batch: &Batch,
        plan: &ChunkPlan,
        is_training: bool,
    ) -> Result<Vec<Tower>> {
        if plan.len() != self.devices.len() || plan.total() != batch.len() {
            return Err(WorkerErr::InvalidConfiguration(format!(
                "a plan of {:?} over {} devices can't split a batch of {}",
                plan.inputs(),
                self.devices.len(),
                batch.len()
            )));
        }

        let devices = &self.devices;
        let builder =
            TowerBuilder::new(&self.model, self.loss_fn.as_ref(), &self.store, self.nclasses)
                .with_weight_decay(self.weight_decay);

        let chunks: Vec<_> = devices
            .devices()
            .iter()
            .zip(plan.input_ranges())
            .filter(|(_, range)| !range.is_empty())
            .collect();

        chunks
            .into_par_iter()
            .map(|(device, range)| {
                let (inputs, labels) = batch.slice(range.start, range.end);
                builder.build(device, devices, inputs, labels, is_training)
            })
            .collect()
    }

    fn report(&self, loss: f32, grads: &AggregatedGradients) {
        let step = self.global_step;
        self.reporter.scalar("train/loss", step, loss as f64);

        let specs = self.store.specs();
        for (id, histogram) in self.aggregator.histograms(grads) {
            if let Some(spec) = specs.get(id.0) {
                self.reporter.gradient_histogram(&spec.name, step, &histogram);
            }
        }
    }
}

fn mean_loss(towers: &[Tower]) -> f32 {
    if towers.is_empty() {
        return 0.;
    }

    towers.iter().map(|tower| tower.loss).sum::<f32>() / towers.len() as f32
}

fn join<T: Clone>(parts: &[ArrayView1<'_, T>], shape: &[usize]) -> Result<ArrayD<T>> {
    let joined: Array1<T> = match parts {
        [] => Array1::from_vec(Vec::new()),
        parts => concatenate(Axis(0), parts).map_err(|e| WorkerErr::Dataset(e.to_string()))?,
    };

    joined
        .into_shape_with_order(IxDyn(shape))
        .map_err(|e| WorkerErr::Dataset(e.to_string()))
}
