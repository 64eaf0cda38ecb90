use log::trace;
use machine_learning::{
    Gradient, MlErr,
    arch::{Model, argmax, loss::LossFn, softmax, softmax_backward},
};
use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn};
use parameter_server::ParameterStore;

use crate::{Device, DevicePool, Result, WorkerErr};

/// One device's share of a step, discarded once its gradients are aggregated.
///
/// `predictions` and `confidence` are flattened over the samples and spatial
/// axes of the chunk, in the order of its labels.
#[derive(Debug, Clone)]
pub struct Tower {
    pub device_id: usize,
    pub loss: f32,
    pub valid_locations: usize,
    pub predictions: Array1<usize>,
    pub confidence: Array1<f32>,
    /// One entry per parameter, present only when training.
    pub gradients: Option<Vec<Option<Gradient>>>,
}

/// Builds the towers of a step against the current parameter values.
pub struct TowerBuilder<'a, M: Model> {
    model: &'a M,
    loss_fn: &'a dyn LossFn,
    params: &'a ParameterStore,
    nclasses: usize,
    weight_decay: f32,
}

impl<'a, M: Model> TowerBuilder<'a, M> {
    /// Creates a new `TowerBuilder`.
    ///
    /// # Arguments
    /// * `model` - The model builder.
    /// * `loss_fn` - The per-location loss.
    /// * `params` - The parameter values every tower reads.
    /// * `nclasses` - The amount of non void classes the model scores.
    pub fn new(
        model: &'a M,
        loss_fn: &'a dyn LossFn,
        params: &'a ParameterStore,
        nclasses: usize,
    ) -> Self {
        Self {
            model,
            loss_fn,
            params,
            nclasses,
            weight_decay: 0.,
        }
    }

    /// Adds an L2 penalty of `0.5 * weight_decay * |w|^2` over the regularized parameters.
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Runs the model on `device` over a chunk of the batch.
    ///
    /// Every operation of the tower executes on the device's own thread.
    ///
    /// # Arguments
    /// * `device` - Where to run.
    /// * `devices` - The pool owning the device.
    /// * `inputs` - The chunk inputs, `[n, ..spatial, channels]`.
    /// * `labels` - The chunk labels, `[n, ..spatial]`.
    /// * `is_training` - Whether to compute gradients.
    ///
    /// # Returns
    /// The tower, or the model builder's error as is.
    pub fn build(
        &self,
        device: &Device,
        devices: &DevicePool,
        inputs: ArrayViewD<'_, f32>,
        labels: ArrayViewD<'_, usize>,
        is_training: bool,
    ) -> Result<Tower> {
        devices.install(device.id, || {
            self.compute(device.id, inputs, labels, is_training)
        })?
    }

    fn compute(
        &self,
        device_id: usize,
        inputs: ArrayViewD<'_, f32>,
        labels: ArrayViewD<'_, usize>,
        is_training: bool,
    ) -> Result<Tower> {
        let nclasses = self.nclasses;
        let locations = labels.len();
        let params = self.params.values();

        let (output, cache) = self
            .model
            .forward(params, inputs, is_training)
            .map_err(WorkerErr::ModelBuilder)?;

        let mut expected = labels.shape().to_vec();
        expected.push(nclasses);
        if output.shape() != expected.as_slice() {
            return Err(MlErr::ShapeMismatch {
                what: "model output",
                got: output.shape().to_vec(),
                expected,
            }
            .into());
        }

        let logits = output
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((locations, nclasses))
            .map_err(|_| MlErr::InvalidInput("model output can't be flattened"))?;
        let probs = softmax(logits.view());

        let labels: Array1<usize> = labels.iter().copied().collect();
        let valid_locations = labels.iter().filter(|&&label| label < nclasses).count();
        let scale = match valid_locations {
            0 => 0.,
            n => 1. / n as f32,
        };

        let y = match self.loss_fn.takes_logits() {
            true => logits.view(),
            false => probs.view(),
        };

        let loss = self.loss_fn.loss(labels.view(), y).sum() * scale + self.decay_loss();
        let predictions = argmax(probs.view());
        let confidence = probs.map_axis(Axis(1), |row| row.fold(0f32, |m, &p| m.max(p)));

        let gradients = if is_training {
            let mut d_out = self.loss_fn.loss_prime(labels.view(), y) * scale;
            if !self.loss_fn.takes_logits() {
                d_out = softmax_backward(probs.view(), d_out.view());
            }

            let d_out = d_out
                .into_shape_with_order(IxDyn(&expected))
                .map_err(|_| MlErr::InvalidInput("loss derivative can't be reshaped"))?;

            let grads = self
                .model
                .backward(params, cache, d_out.view())
                .map_err(WorkerErr::ModelBuilder)?;

            if grads.len() != params.len() {
                return Err(MlErr::SizeMismatch {
                    what: "model gradients",
                    got: grads.len(),
                    expected: params.len(),
                }
                .into());
            }

            Some(self.add_weight_decay(grads))
        } else {
            None
        };

        trace!(device = device_id, loss = loss, locations = locations; "tower done");

        Ok(Tower {
            device_id,
            loss,
            valid_locations,
            predictions,
            confidence,
            gradients,
        })
    }

    fn decay_loss(&self) -> f32 {
        if self.weight_decay == 0. {
            return 0.;
        }

        let norm: f32 = self
            .params
            .specs()
            .iter()
            .zip(self.params.values())
            .filter(|(spec, _)| spec.regularized)
            .map(|(_, value)| value.iter().map(|w| w * w).sum::<f32>())
            .sum();

        0.5 * self.weight_decay * norm
    }

    /// Adds the derivative of the L2 penalty, `weight_decay * w`.
    ///
    /// Regularized parameters always get a dense gradient once the penalty applies.
    fn add_weight_decay(&self, grads: Vec<Option<Gradient>>) -> Vec<Option<Gradient>> {
        if self.weight_decay == 0. {
            return grads;
        }

        grads
            .into_iter()
            .zip(self.params.specs().iter().zip(self.params.values()))
            .map(|(grad, (spec, value))| {
                if !spec.regularized {
                    return grad;
                }

                let decay: ArrayD<f32> = value * self.weight_decay;
                Some(Gradient::Dense(match grad {
                    Some(grad) => grad.to_dense() + decay,
                    None => decay,
                }))
            })
            .collect()
    }
}
