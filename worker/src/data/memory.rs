use std::collections::HashMap;

use ndarray::{ArrayD, Axis, IxDyn, Slice};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{Batch, Dataset, DatasetProvider};
use crate::{Result, WorkerErr};

/// A dataset held entirely in memory, served in order in batches of a fixed size.
///
/// The last batch of an epoch is short when the samples don't divide evenly.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    inputs: ArrayD<f32>,
    labels: ArrayD<usize>,
    batch_size: usize,
    nclasses: usize,
    void_labels: Vec<usize>,
    data_shape: Vec<usize>,
    cursor: usize,
}

impl InMemoryDataset {
    /// Creates a new `InMemoryDataset`.
    ///
    /// # Arguments
    /// * `inputs` - Every sample, with shape `[samples, ..spatial, channels]`.
    /// * `labels` - Every label, with shape `[samples, ..spatial]`.
    /// * `batch_size` - The amount of samples per batch.
    /// * `nclasses` - The amount of non void classes.
    ///
    /// # Returns
    /// The dataset or a `Dataset` error if the pieces don't fit together.
    pub fn new(
        inputs: ArrayD<f32>,
        labels: ArrayD<usize>,
        batch_size: usize,
        nclasses: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(WorkerErr::Dataset("the batch size must be positive".to_string()));
        }

        let all = Batch::new(inputs, labels)?;
        let data_shape = all.data_shape().to_vec();
        let (inputs, labels) = all.into_parts();

        Ok(Self {
            inputs,
            labels,
            batch_size,
            nclasses,
            void_labels: Vec::new(),
            data_shape,
            cursor: 0,
        })
    }

    /// Declares which labels are void.
    pub fn with_void_labels(mut self, void_labels: Vec<usize>) -> Self {
        self.void_labels = void_labels;
        self
    }

    /// Creates a random, learnable dataset: the label of every location is the
    /// index of its largest channel, modulo `nclasses`.
    ///
    /// # Arguments
    /// * `samples` - The amount of samples.
    /// * `data_shape` - The spatial shape of a sample.
    /// * `channels` - The amount of channels of every location.
    /// * `nclasses` - The amount of classes.
    /// * `batch_size` - The amount of samples per batch.
    /// * `seed` - The seed of the generator.
    pub fn synthetic(
        samples: usize,
        data_shape: &[usize],
        channels: usize,
        nclasses: usize,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if channels == 0 || nclasses == 0 {
            return Err(WorkerErr::Dataset(
                "synthetic data needs channels and classes".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);

        let mut shape = vec![samples];
        shape.extend_from_slice(data_shape);
        let labels_shape = shape.clone();
        shape.push(channels);

        let inputs = ArrayD::from_shape_simple_fn(IxDyn(&shape), || rng.random::<f32>());

        let labels: Vec<usize> = inputs
            .lanes(Axis(shape.len() - 1))
            .into_iter()
            .map(|lane| {
                let mut best = 0;
                for (i, &v) in lane.iter().enumerate() {
                    if v > lane[best] {
                        best = i;
                    }
                }
                best % nclasses
            })
            .collect();

        let labels = ArrayD::from_shape_vec(IxDyn(&labels_shape), labels)
            .map_err(|e| WorkerErr::Dataset(e.to_string()))?;

        Self::new(inputs, labels, batch_size, nclasses)
    }

    /// Returns the total amount of samples.
    pub fn len(&self) -> usize {
        self.labels.shape().first().copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Dataset for InMemoryDataset {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.cursor >= self.len() {
            self.cursor = 0;
            return Ok(None);
        }

        let end = (self.cursor + self.batch_size).min(self.len());
        let slice = Slice::from(self.cursor..end);
        self.cursor = end;

        let inputs = self.inputs.slice_axis(Axis(0), slice).to_owned();
        let labels = self.labels.slice_axis(Axis(0), slice).to_owned();
        Batch::new(inputs, labels).map(Some)
    }

    fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    fn data_shape(&self) -> &[usize] {
        &self.data_shape
    }

    fn nclasses(&self) -> usize {
        self.nclasses
    }

    fn void_labels(&self) -> &[usize] {
        &self.void_labels
    }
}

/// Serves named in-memory sets, every `open` starts a fresh epoch.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    sets: HashMap<String, InMemoryDataset>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the set named `name`.
    pub fn with_set(mut self, name: impl Into<String>, dataset: InMemoryDataset) -> Self {
        self.sets.insert(name.into(), dataset);
        self
    }
}

impl DatasetProvider for InMemoryProvider {
    fn open(&self, set: &str) -> Result<Box<dyn Dataset>> {
        let mut dataset = self
            .sets
            .get(set)
            .cloned()
            .ok_or_else(|| WorkerErr::Dataset(format!("there is no set named {set:?}")))?;

        dataset.cursor = 0;
        Ok(Box::new(dataset))
    }
}
