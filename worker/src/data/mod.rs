mod dataset;
mod loader;
mod memory;

pub use dataset::{Batch, Dataset, DatasetProvider};
pub use loader::BatchQueue;
pub use memory::{InMemoryDataset, InMemoryProvider};
