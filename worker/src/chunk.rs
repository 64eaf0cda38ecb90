use std::ops::Range;

use crate::{Result, WorkerErr};

/// The per-device partition of a batch.
///
/// Both sequences have one entry per device. The label chunks count label
/// locations, that is, the input chunk times the locations of every sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    inputs: Vec<usize>,
    labels: Vec<usize>,
}

impl ChunkPlan {
    /// Splits `n` samples into `num_devices` contiguous chunks whose sizes
    /// differ by at most one, the first `n % num_devices` chunks being the larger ones.
    fn balanced(n: usize, num_devices: usize, locations: usize) -> Self {
        let inputs: Vec<usize> = (0..num_devices)
            .map(|device| shard_range(n, device, num_devices).len())
            .collect();
        let labels = inputs.iter().map(|chunk| chunk * locations).collect();

        Self { inputs, labels }
    }

    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Returns the amount of devices.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Returns the amount of samples in the batch.
    pub fn total(&self) -> usize {
        self.inputs.iter().sum()
    }

    /// Returns the sample range of the batch each device processes.
    pub fn input_ranges(&self) -> Vec<Range<usize>> {
        ranges(&self.inputs)
    }
}

fn ranges(chunks: &[usize]) -> Vec<Range<usize>> {
    chunks
        .iter()
        .scan(0, |start, &len| {
            let range = *start..*start + len;
            *start += len;
            Some(range)
        })
        .collect()
}

/// Returns the shard of `total` items assigned to `device` out of `num_devices`.
fn shard_range(total: usize, device: usize, num_devices: usize) -> Range<usize> {
    let base = total / num_devices;
    let rem = total % num_devices;

    let start = device * base + device.min(rem);
    let extra = usize::from(device < rem);
    start..start + base + extra
}

/// Divides `batch_size` samples as evenly as possible across `num_devices`.
///
/// # Arguments
/// * `batch_size` - The amount of samples to split.
/// * `num_devices` - The amount of devices to split them across.
///
/// # Returns
/// The chunk plan, with one label per sample, or `InvalidConfiguration` if
/// there are no devices or some device would receive no samples.
pub fn split(batch_size: usize, num_devices: usize) -> Result<ChunkPlan> {
    if num_devices == 0 {
        return Err(WorkerErr::InvalidConfiguration(
            "at least one device is needed to split a batch".to_string(),
        ));
    }

    if batch_size < num_devices {
        return Err(WorkerErr::InvalidConfiguration(format!(
            "a batch of {batch_size} can't feed {num_devices} devices"
        )));
    }

    Ok(ChunkPlan::balanced(batch_size, num_devices, 1))
}

/// Plans how the batches of a dataset are split across devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSplitter {
    num_devices: usize,
    locations: usize,
}

impl ChunkSplitter {
    /// Creates a new `ChunkSplitter`.
    ///
    /// # Arguments
    /// * `num_devices` - The amount of devices.
    /// * `data_shape` - The spatial shape of a sample, each location carries a label.
    ///
    /// # Returns
    /// The splitter or `InvalidConfiguration` if there are no devices.
    pub fn new(num_devices: usize, data_shape: &[usize]) -> Result<Self> {
        if num_devices == 0 {
            return Err(WorkerErr::InvalidConfiguration(
                "at least one device is needed to split a batch".to_string(),
            ));
        }

        Ok(Self {
            num_devices,
            locations: data_shape.iter().product(),
        })
    }

    pub fn num_devices(&self) -> usize {
        self.num_devices
    }

    /// Returns the amount of labels of every sample.
    pub fn locations(&self) -> usize {
        self.locations
    }

    /// Plans a full batch, validating that every device gets work.
    pub fn plan_full(&self, batch_size: usize) -> Result<ChunkPlan> {
        split(batch_size, self.num_devices)?;
        Ok(ChunkPlan::balanced(batch_size, self.num_devices, self.locations))
    }

    /// Plans a batch of `n` samples.
    ///
    /// Short batches (the last one of an epoch) may leave trailing devices idle
    /// with empty chunks.
    pub fn plan(&self, n: usize) -> ChunkPlan {
        ChunkPlan::balanced(n, self.num_devices, self.locations)
    }
}
