use ndarray::{ArrayD, ArrayViewD, Axis, Slice};

use crate::{Result, WorkerErr};

/// A batch of samples and their per-location labels.
///
/// `inputs` has shape `[n, ..spatial, channels]` and `labels` has shape
/// `[n, ..spatial]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    inputs: ArrayD<f32>,
    labels: ArrayD<usize>,
}

impl Batch {
    /// Creates a new `Batch`.
    ///
    /// # Returns
    /// The batch or a `Dataset` error if the labels don't match the spatial
    /// shape of the inputs.
    pub fn new(inputs: ArrayD<f32>, labels: ArrayD<usize>) -> Result<Self> {
        let spatial = inputs.shape().split_last().map(|(_, rest)| rest);

        if spatial != Some(labels.shape()) {
            return Err(WorkerErr::Dataset(format!(
                "labels of shape {:?} don't fit inputs of shape {:?}",
                labels.shape(),
                inputs.shape()
            )));
        }

        Ok(Self { inputs, labels })
    }

    pub fn inputs(&self) -> &ArrayD<f32> {
        &self.inputs
    }

    pub fn labels(&self) -> &ArrayD<usize> {
        &self.labels
    }

    pub fn into_parts(self) -> (ArrayD<f32>, ArrayD<usize>) {
        (self.inputs, self.labels)
    }

    /// Returns the amount of samples.
    pub fn len(&self) -> usize {
        self.labels.shape().first().copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the spatial shape of every sample.
    pub fn data_shape(&self) -> &[usize] {
        self.labels.shape().get(1..).unwrap_or_default()
    }

    /// Returns the inputs and labels of the samples in `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> (ArrayViewD<'_, f32>, ArrayViewD<'_, usize>) {
        let slice = Slice::from(start..end);
        (
            self.inputs.slice_axis(Axis(0), slice),
            self.labels.slice_axis(Axis(0), slice),
        )
    }
}

/// The dataset collaborator: a finite, restartable sequence of batches.
pub trait Dataset: Send {
    /// Returns the next batch of the epoch.
    ///
    /// `None` marks the end of the epoch, after which the dataset starts over.
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Returns the amount of batches of an epoch.
    fn num_batches(&self) -> usize;

    /// Returns the spatial shape of a sample.
    fn data_shape(&self) -> &[usize];

    /// Returns the amount of classes, excluding the void ones.
    fn nclasses(&self) -> usize;

    /// Returns the labels that mark locations to ignore, all `>= nclasses`.
    fn void_labels(&self) -> &[usize] {
        &[]
    }
}

/// Opens the named sets of a dataset (`train`, `valid`, `test`, ...).
pub trait DatasetProvider {
    /// Opens `set`, positioned at the beginning of an epoch.
    fn open(&self, set: &str) -> Result<Box<dyn Dataset>>;
}
