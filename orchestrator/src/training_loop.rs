use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use machine_learning::arch::Model;
use worker::{
    ChunkSplitter, StepExecutor, ValidationRunner,
    data::{BatchQueue, DatasetProvider},
};

use crate::{
    CheckpointStore, OrchestratorError, Result,
    configs::{RunSettings, TrainingConfig},
};

/// The set whose score decides the best model and early stopping.
pub const VALID: &str = "valid";

/// Runs one validation pass of the current model over a named set.
pub trait Evaluator<M: Model> {
    /// # Returns
    /// The mean IoU of the model over `set`.
    fn evaluate(&mut self, executor: &StepExecutor<M>, set: &str, epoch: usize) -> Result<f64>;
}

/// Evaluates the sets of a `DatasetProvider` with a `ValidationRunner`.
///
/// Every pass opens its set afresh and reads it synchronously, in order.
pub struct SetEvaluator<'a> {
    provider: &'a dyn DatasetProvider,
    runner: ValidationRunner,
}

impl<'a> SetEvaluator<'a> {
    pub fn new(provider: &'a dyn DatasetProvider, runner: ValidationRunner) -> Self {
        Self { provider, runner }
    }

    pub fn runner(&self) -> &ValidationRunner {
        &self.runner
    }
}

impl<M: Model> Evaluator<M> for SetEvaluator<'_> {
    fn evaluate(&mut self, executor: &StepExecutor<M>, set: &str, epoch: usize) -> Result<f64> {
        let mut dataset = self.provider.open(set)?;
        let splitter = ChunkSplitter::new(executor.num_devices(), dataset.data_shape())?;
        let miou = self
            .runner
            .run(executor, &splitter, set, dataset.as_mut(), epoch)?;
        Ok(miou)
    }
}

/// When to validate and when to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub max_epochs: usize,
    /// Early stopping never fires before this (zero based) epoch.
    pub min_epochs: usize,
    /// Epochs without improvement tolerated before stopping early.
    pub patience: usize,
    pub val_every: usize,
    /// Epoch ends to skip before the first validation.
    pub val_skip: usize,
}

impl Schedule {
    pub fn new(config: &TrainingConfig, settings: &RunSettings) -> Self {
        Self {
            max_epochs: config.max_epochs,
            min_epochs: config.min_epochs,
            patience: config.patience,
            val_every: settings.val_every,
            val_skip: settings.val_skip,
        }
    }
}

/// The counters a `TrainingLoop` advances as it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopState {
    pub epoch_id: usize,
    pub batch_id: usize,
    pub cumulative_iteration: u64,
    pub patience_counter: usize,
    pub val_skip: usize,
    pub early_stop: bool,
}

impl LoopState {
    pub fn new(val_skip: usize) -> Self {
        Self {
            val_skip,
            ..Self::default()
        }
    }

    pub fn is_last_epoch(&self, schedule: &Schedule) -> bool {
        self.epoch_id + 1 >= schedule.max_epochs
    }

    /// Closes the current epoch.
    ///
    /// # Returns
    /// Whether a validation pass must run now: on the last epoch, once early
    /// stopping is intended, or when the skip counter ran out. Otherwise the
    /// skip counter goes down by one.
    pub fn end_epoch(&mut self, schedule: &Schedule) -> bool {
        self.patience_counter += 1;

        if self.epoch_id >= schedule.min_epochs && self.patience_counter >= schedule.patience {
            self.early_stop = true;
        }

        if self.is_last_epoch(schedule) || self.early_stop || self.val_skip == 0 {
            return true;
        }

        self.val_skip -= 1;
        false
    }

    /// Applies the outcome of a validation pass.
    pub fn after_validation(&mut self, improved: bool, schedule: &Schedule) {
        if improved {
            self.patience_counter = 0;
            self.early_stop = false;
        }

        self.val_skip = schedule.val_every;
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    EarlyStopped,
    MaxEpochsReached,
    ValidationOnly,
}

/// What a run returns.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    /// The best `valid` mean IoU seen during the run.
    pub best_valid_miou: Option<f64>,
    /// The `valid` mean IoU of every validation pass, in order.
    pub history: Vec<f64>,
    /// The (one based) validation passes that saved a best checkpoint.
    pub best_passes: Vec<usize>,
    pub termination: Termination,
    pub epochs_run: usize,
    pub iterations: u64,
    pub elapsed: Duration,
}

/// Drives the epochs of a run: trains on every batch, checkpoints, validates
/// on schedule, tracks the best model and stops early when patience runs out.
pub struct TrainingLoop<M: Model, E: Evaluator<M>> {
    executor: StepExecutor<M>,
    train: BatchQueue,
    splitter: ChunkSplitter,
    evaluator: E,
    checkpoints: CheckpointStore,
    schedule: Schedule,
    sets: Vec<String>,
    show_progress: bool,
}

impl<M: Model, E: Evaluator<M>> TrainingLoop<M, E> {
    /// Creates a new `TrainingLoop` that validates on the `valid` set only.
    ///
    /// # Arguments
    /// * `executor` - Runs the training steps.
    /// * `train` - The training batches.
    /// * `evaluator` - Runs the validation passes.
    /// * `checkpoints` - Where rolling and best checkpoints go.
    /// * `schedule` - The epoch and validation schedule.
    pub fn new(
        executor: StepExecutor<M>,
        train: BatchQueue,
        evaluator: E,
        mut checkpoints: CheckpointStore,
        schedule: Schedule,
    ) -> Result<Self> {
        let splitter = ChunkSplitter::new(executor.num_devices(), train.data_shape())?;
        if let Err(e) = checkpoints.resume(executor.global_step()) {
            warn!("couldn't inspect the existing checkpoints: {e}");
        }

        Ok(Self {
            executor,
            train,
            splitter,
            evaluator,
            checkpoints,
            schedule,
            sets: vec![VALID.to_string()],
            show_progress: false,
        })
    }

    /// Sets the sets validated on every pass, `valid` must be one of them.
    pub fn with_sets(mut self, sets: Vec<String>) -> Self {
        self.sets = sets;
        self
    }

    /// Shows a progress bar over the batches of every epoch.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn executor(&self) -> &StepExecutor<M> {
        &self.executor
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Runs until the last epoch or until it stops early.
    ///
    /// # Returns
    /// The outcome of the run or the first fatal error.
    pub fn run(&mut self) -> Result<TrainingOutcome> {
        if !self.sets.iter().any(|set| set == VALID) {
            return Err(OrchestratorError::InvalidConfiguration(format!(
                "training needs the {VALID} set among the validated sets"
            )));
        }

        let start = Instant::now();
        let mut state = LoopState::new(self.schedule.val_skip);
        let mut history: Vec<f64> = Vec::new();
        let mut best_passes = Vec::new();
        let mut termination = Termination::MaxEpochsReached;
        let mut epochs_run = 0;

        info!("Beginning main loop...");

        for epoch_id in 0..self.schedule.max_epochs {
            state.epoch_id = epoch_id;

            let epoch_start = Instant::now();
            let loss = self.run_epoch(&mut state)?;
            epochs_run += 1;

            info!(
                epoch = epoch_id + 1,
                loss = loss,
                elapsed_s = epoch_start.elapsed().as_secs_f64();
                "Epoch {}/{}, Loss: {loss}",
                epoch_id + 1,
                self.schedule.max_epochs
            );

            if !state.end_epoch(&self.schedule) {
                continue;
            }

            let score = self.validate(epoch_id)?;
            let improved = history.iter().all(|&past| score >= past);
            history.push(score);

            if improved {
                info!("## Best model found! ##");
                best_passes.push(history.len());
                self.save_best();
            }

            state.after_validation(improved, &self.schedule);

            if state.early_stop {
                info!("Early Stop!");
                termination = Termination::EarlyStopped;
                break;
            }
        }

        Ok(TrainingOutcome {
            best_valid_miou: history.iter().copied().reduce(f64::max),
            history,
            best_passes,
            termination,
            epochs_run,
            iterations: state.cumulative_iteration,
            elapsed: start.elapsed(),
        })
    }

    /// Trains on every batch of one epoch.
    ///
    /// # Returns
    /// The loss of the last step.
    fn run_epoch(&mut self, state: &mut LoopState) -> Result<f32> {
        let progress = self.progress_bar(self.train.num_batches());
        let mut loss = 0.;
        state.batch_id = 0;

        while let Some(batch) = self.train.next_batch()? {
            if batch.is_empty() {
                continue;
            }

            let iter_start = Instant::now();
            state.cumulative_iteration += 1;

            // only the last batch of an epoch may be short
            let plan = match state.batch_id {
                0 => self.splitter.plan_full(batch.len())?,
                _ => self.splitter.plan(batch.len()),
            };
            loss = self.executor.run_training_step(&batch, &plan)?.loss;
            self.save_rolling();

            state.batch_id += 1;
            let elapsed = iter_start.elapsed();

            debug!(
                epoch = state.epoch_id,
                batch = state.batch_id,
                iteration = state.cumulative_iteration,
                loss = loss,
                elapsed_ms = elapsed.as_millis() as u64;
                "iteration done"
            );

            progress.set_message(format!(
                "({}) {elapsed:.2?}, Loss {loss:.5}",
                state.cumulative_iteration
            ));
            progress.inc(1);
        }

        progress.finish_and_clear();

        if state.batch_id == 0 {
            return Err(OrchestratorError::Dataset(
                "the train set produced an empty epoch".to_string(),
            ));
        }

        Ok(loss)
    }

    /// Validates on every configured set.
    ///
    /// # Returns
    /// The score of the `valid` set.
    fn validate(&mut self, epoch: usize) -> Result<f64> {
        let mut valid = None;

        for set in &self.sets {
            info!("Starting validation on {set} set");
            let miou = self.evaluator.evaluate(&self.executor, set, epoch)?;

            if set == VALID {
                valid = Some(miou);
            }
        }

        valid.ok_or_else(|| OrchestratorError::InvalidConfiguration(format!("no {VALID} score")))
    }

    /// Failures are logged, the run goes on without this checkpoint.
    fn save_rolling(&mut self) {
        let state = self.executor.training_state();
        if let Err(e) = self.checkpoints.save_rolling(&state) {
            warn!("couldn't save the rolling checkpoint: {e}");
        }
    }

    /// Retried once, then given up on.
    fn save_best(&self) {
        let state = self.executor.training_state();

        match retry_once(|| self.checkpoints.save_best(&state)) {
            Ok(path) => info!("Saved the best checkpoint to {}", path.display()),
            Err(e) => warn!("couldn't save the best checkpoint: {e}"),
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len as u64);
        let template = "Batch {pos}/{len} [{elapsed_precise}] {wide_bar} {msg}";
        match ProgressStyle::with_template(template) {
            Ok(style) => bar.set_style(style),
            Err(e) => debug!("falling back to the default progress style: {e}"),
        }

        bar
    }
}

/// Runs `save`, and once more if it fails.
fn retry_once<F>(mut save: F) -> Result<PathBuf>
where
    F: FnMut() -> Result<PathBuf>,
{
    save().or_else(|e| {
        warn!("couldn't save the best checkpoint, retrying: {e}");
        save()
    })
}

/// Validates once on every set in `sets`, without training.
///
/// # Returns
/// An outcome holding the `valid` score, or the best score when `valid`
/// isn't among the sets.
pub fn validate_only<M: Model, E: Evaluator<M>>(
    executor: &StepExecutor<M>,
    evaluator: &mut E,
    sets: &[String],
) -> Result<TrainingOutcome> {
    let start = Instant::now();
    let mut valid = None;
    let mut best: Option<f64> = None;

    for set in sets {
        info!("Starting validation on {set} set");
        let miou = evaluator.evaluate(executor, set, 0)?;

        if set == VALID {
            valid = Some(miou);
        }

        best = Some(best.map_or(miou, |best| best.max(miou)));
    }

    Ok(TrainingOutcome {
        best_valid_miou: valid.or(best),
        history: valid.into_iter().collect(),
        best_passes: Vec::new(),
        termination: Termination::ValidationOnly,
        epochs_run: 0,
        iterations: 0,
        elapsed: start.elapsed(),
    })
}
