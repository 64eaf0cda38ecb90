use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, warn};
use machine_learning::arch::Model;
use serde::Serialize;

use crate::{
    ChunkSplitter, ConfusionMatrix, InferenceOutput, NullReporter, Reporter, Result, StepExecutor,
    data::{Batch, Dataset},
};

/// Where a `ValidationRunner` is in its pass over a set.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationPhase {
    Idle,
    Running { set: String },
    Reported { set: String, miou: f64 },
}

/// Which side artifacts a validation pass persists.
#[derive(Debug, Clone, Default)]
pub struct ArtifactOptions {
    /// The directory artifacts are written under, nothing is written without one.
    pub dir: Option<PathBuf>,
    pub save_samples: bool,
    pub save_heatmap: bool,
}

#[derive(Serialize)]
struct SampleArtifact<'a> {
    set: &'a str,
    epoch: usize,
    shape: &'a [usize],
    labels: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    predictions: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heatmap: Option<Vec<f32>>,
}

/// Computes the mean IoU of a model over a whole evaluation set.
pub struct ValidationRunner {
    matrix: ConfusionMatrix,
    phase: ValidationPhase,
    artifacts: ArtifactOptions,
    reporter: Arc<dyn Reporter>,
}

impl ValidationRunner {
    /// Creates a new, idle `ValidationRunner`.
    ///
    /// # Arguments
    /// * `nclasses` - The amount of non void classes.
    pub fn new(nclasses: usize) -> Self {
        Self {
            matrix: ConfusionMatrix::new(nclasses),
            phase: ValidationPhase::Idle,
            artifacts: ArtifactOptions::default(),
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactOptions) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn phase(&self) -> &ValidationPhase {
        &self.phase
    }

    /// The confusion matrix of the last pass.
    pub fn matrix(&self) -> &ConfusionMatrix {
        &self.matrix
    }

    /// Runs every batch of `dataset` through `executor` in inference mode.
    ///
    /// The confusion matrix is reset when the pass starts, so nothing leaks
    /// between sets. A failed pass leaves the runner idle.
    ///
    /// # Arguments
    /// * `executor` - Runs the inference steps.
    /// * `splitter` - Splits every batch across the devices.
    /// * `set` - The name of the set, for reporting.
    /// * `dataset` - The set, read until the end of its epoch.
    /// * `epoch` - The current training epoch, for reporting.
    ///
    /// # Returns
    /// The mean IoU over the whole set.
    pub fn run<M: Model>(
        &mut self,
        executor: &StepExecutor<M>,
        splitter: &ChunkSplitter,
        set: &str,
        dataset: &mut dyn Dataset,
        epoch: usize,
    ) -> Result<f64> {
        self.phase = ValidationPhase::Running {
            set: set.to_string(),
        };
        self.matrix.reset();

        if let Err(e) = self.consume(executor, splitter, set, dataset, epoch) {
            self.phase = ValidationPhase::Idle;
            return Err(e);
        }

        let miou = self.matrix.mean_iou();
        self.phase = ValidationPhase::Reported {
            set: set.to_string(),
            miou,
        };
        self.reporter.validation(set, epoch, miou);

        Ok(miou)
    }

    fn consume<M: Model>(
        &mut self,
        executor: &StepExecutor<M>,
        splitter: &ChunkSplitter,
        set: &str,
        dataset: &mut dyn Dataset,
        epoch: usize,
    ) -> Result<()> {
        let mut batches = 0usize;
        let mut loss = 0f64;

        while let Some(batch) = dataset.next_batch()? {
            if batch.is_empty() {
                continue;
            }

            let out = executor.run_inference_step(&batch, &splitter.plan(batch.len()))?;
            self.matrix.update(batch.labels().iter(), out.predictions.iter());

            if batches == 0 {
                self.persist_artifacts(set, epoch, &batch, &out);
            }

            batches += 1;
            loss += out.loss as f64;
        }

        if batches > 0 {
            self.reporter
                .scalar(&format!("{set}/loss"), epoch as u64, loss / batches as f64);
        }

        debug!(set = set, batches = batches; "validation pass done");
        Ok(())
    }

    /// Best effort, failures are logged and swallowed.
    fn persist_artifacts(&self, set: &str, epoch: usize, batch: &Batch, out: &InferenceOutput) {
        let ArtifactOptions {
            dir: Some(dir),
            save_samples,
            save_heatmap,
        } = &self.artifacts
        else {
            return;
        };

        if !save_samples && !save_heatmap {
            return;
        }

        let artifact = SampleArtifact {
            set,
            epoch,
            shape: batch.labels().shape(),
            labels: batch.labels().iter().copied().collect(),
            predictions: save_samples.then(|| out.predictions.iter().copied().collect()),
            heatmap: save_heatmap.then(|| out.confidence.iter().copied().collect()),
        };

        match write_artifact(dir, set, epoch, &artifact) {
            Ok(path) => debug!("saved validation samples to {}", path.display()),
            Err(e) => warn!("couldn't save the validation samples of {set}: {e}"),
        }
    }
}

fn write_artifact(
    dir: &Path,
    set: &str,
    epoch: usize,
    artifact: &SampleArtifact,
) -> Result<PathBuf> {
    let dir = dir.join("samples").join(set);
    fs::create_dir_all(&dir)?;

    let path = dir.join(format!("epoch_{epoch}.json"));
    fs::write(&path, serde_json::to_vec(artifact)?)?;
    Ok(path)
}
