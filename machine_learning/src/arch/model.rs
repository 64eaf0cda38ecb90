use std::error::Error;

use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};

use crate::Gradient;

/// The error type model builders report. It is handed to the caller untouched.
pub type BuilderError = Box<dyn Error + Send + Sync>;

/// The identity of a trainable parameter: its position in `Model::params`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParamId(pub usize);

/// How a parameter is filled before the first training step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamInit {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform { fan_in: usize, fan_out: usize },
}

/// Describes one trainable parameter of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub init: ParamInit,
    /// Whether weight decay applies to this parameter.
    pub regularized: bool,
}

impl ParamSpec {
    /// Creates a new regularized `ParamSpec`.
    ///
    /// # Arguments
    /// * `name` - A unique, human readable name for the parameter.
    /// * `shape` - The shape of the parameter.
    /// * `init` - How to initialize it.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, init: ParamInit) -> Self {
        Self {
            name: name.into(),
            shape,
            init,
            regularized: true,
        }
    }

    /// Excludes this parameter from weight decay.
    pub fn unregularized(mut self) -> Self {
        self.regularized = false;
        self
    }

    /// Returns the amount of scalars in this parameter.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The model-building collaborator.
///
/// A model is a pure function of its inputs and the current parameter values.
/// It declares its parameters up front, maps a batch of inputs with shape
/// `[n, ..spatial, channels]` into raw scores with shape `[n, ..spatial, nclasses]`
/// and, given the derivative of the loss with respect to those scores, produces
/// one gradient per declared parameter.
///
/// Every call must be independent from every other one so that the same model
/// can be evaluated concurrently on several devices.
pub trait Model: Send + Sync {
    /// Whatever the forward pass needs to keep around for the backward pass.
    type Cache: Send;

    /// Returns the trainable parameters, `ParamId(i)` refers to the i-th one.
    fn params(&self) -> Vec<ParamSpec>;

    /// Computes the raw output (logits) of the model.
    ///
    /// # Arguments
    /// * `params` - The current parameter values, in `params()` order.
    /// * `x` - The input chunk.
    /// * `is_training` - Whether this pass belongs to a training step.
    ///
    /// # Returns
    /// The raw output and the cache for `backward`.
    fn forward(
        &self,
        params: &[ArrayD<f32>],
        x: ArrayViewD<'_, f32>,
        is_training: bool,
    ) -> Result<(ArrayD<f32>, Self::Cache), BuilderError>;

    /// Computes the gradient of the loss with respect to every parameter.
    ///
    /// # Arguments
    /// * `params` - The parameter values used in the matching `forward` call.
    /// * `cache` - The cache produced by that call.
    /// * `d_out` - The derivative of the loss with respect to the raw output.
    ///
    /// # Returns
    /// One entry per parameter, `None` for parameters the output doesn't depend on.
    fn backward(
        &self,
        params: &[ArrayD<f32>],
        cache: Self::Cache,
        d_out: ArrayViewD<'_, f32>,
    ) -> Result<Vec<Option<Gradient>>, BuilderError>;
}
