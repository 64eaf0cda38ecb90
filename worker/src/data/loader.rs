use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Batch, Dataset};
use crate::{Result, WorkerErr};

/// Feeds the training loop with the batches of a dataset.
///
/// In prefetching mode a pool of producer threads keeps a bounded queue
/// filled ahead of the consumer. The dataset is shared behind a lock that is
/// held until the batch is queued, so batches (and the `None` marking the end
/// of every epoch) arrive in dataset order.
pub struct BatchQueue {
    source: Source,
    num_batches: usize,
    data_shape: Vec<usize>,
    nclasses: usize,
    void_labels: Vec<usize>,
}

enum Source {
    Direct(Box<dyn Dataset>),
    Prefetch(Prefetcher),
}

struct Prefetcher {
    rx: mpsc::Receiver<Result<Option<Batch>>>,
    stop: Arc<AtomicBool>,
    producers: Vec<JoinHandle<()>>,
}

impl BatchQueue {
    /// Creates a `BatchQueue` that reads `dataset` on demand, blocking the caller.
    pub fn synchronous(dataset: Box<dyn Dataset>) -> Self {
        Self {
            num_batches: dataset.num_batches(),
            data_shape: dataset.data_shape().to_vec(),
            nclasses: dataset.nclasses(),
            void_labels: dataset.void_labels().to_vec(),
            source: Source::Direct(dataset),
        }
    }

    /// Creates a `BatchQueue` backed by producer threads.
    ///
    /// # Arguments
    /// * `dataset` - The dataset to read.
    /// * `nthreads` - The amount of producer threads.
    /// * `queue_size` - The maximum amount of batches waiting to be consumed.
    ///
    /// # Returns
    /// The queue or an error if the arguments are zero or a thread can't be spawned.
    pub fn prefetching(
        dataset: Box<dyn Dataset>,
        nthreads: usize,
        queue_size: usize,
    ) -> Result<Self> {
        if nthreads == 0 || queue_size == 0 {
            return Err(WorkerErr::InvalidConfiguration(
                "prefetching needs at least one thread and one queue slot".to_string(),
            ));
        }

        let num_batches = dataset.num_batches();
        let data_shape = dataset.data_shape().to_vec();
        let nclasses = dataset.nclasses();
        let void_labels = dataset.void_labels().to_vec();

        let dataset = Arc::new(Mutex::new(dataset));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(queue_size);

        let producers = (0..nthreads)
            .map(|i| {
                let dataset = Arc::clone(&dataset);
                let stop = Arc::clone(&stop);
                let tx = tx.clone();

                thread::Builder::new()
                    .name(format!("batch-producer-{i}"))
                    .spawn(move || produce(&dataset, &stop, &tx))
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        debug!(nthreads = nthreads, queue_size = queue_size; "batch prefetching started");

        Ok(Self {
            source: Source::Prefetch(Prefetcher {
                rx,
                stop,
                producers,
            }),
            num_batches,
            data_shape,
            nclasses,
            void_labels,
        })
    }

    /// Returns the next batch, `None` at the end of every epoch.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        match &mut self.source {
            Source::Direct(dataset) => dataset.next_batch(),
            Source::Prefetch(prefetcher) => match prefetcher.rx.blocking_recv() {
                Some(item) => item,
                None => Err(WorkerErr::Dataset(
                    "every batch producer stopped".to_string(),
                )),
            },
        }
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn data_shape(&self) -> &[usize] {
        &self.data_shape
    }

    pub fn nclasses(&self) -> usize {
        self.nclasses
    }

    pub fn void_labels(&self) -> &[usize] {
        &self.void_labels
    }
}

fn produce(
    dataset: &Mutex<Box<dyn Dataset>>,
    stop: &AtomicBool,
    tx: &mpsc::Sender<Result<Option<Batch>>>,
) {
    while !stop.load(Ordering::Acquire) {
        let mut dataset = dataset.lock();
        let item = dataset.next_batch();
        let failed = item.is_err();

        if tx.blocking_send(item).is_err() || failed {
            break;
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.rx.close();

        for producer in self.producers.drain(..) {
            if producer.join().is_err() {
                warn!("a batch producer panicked");
            }
        }
    }
}
