use std::sync::Arc;

use log::info;
use machine_learning::arch::Model;
use parameter_server::ParameterStore;
use rand::{SeedableRng, rngs::StdRng};
use worker::{
    ArtifactOptions, DevicePool, LogReporter, Reporter, StepExecutor, ValidationRunner,
    data::{BatchQueue, DatasetProvider},
};

use crate::{
    CheckpointStore, OrchestratorError, Result,
    configs::{RestoreMode, RunSettings, TrainingConfig},
    training_loop::{Schedule, SetEvaluator, TrainingLoop, TrainingOutcome, validate_only},
};

const TRAIN: &str = "train";

/// A validated training run, ready to be started.
pub struct Session<'a, M: Model> {
    config: TrainingConfig,
    settings: RunSettings,
    model: M,
    provider: &'a dyn DatasetProvider,
    show_progress: bool,
}

impl<'a, M: Model> Session<'a, M> {
    /// Creates a new `Session`.
    ///
    /// # Arguments
    /// * `config` - The configuration of the run, validated here.
    /// * `model` - The model builder.
    /// * `provider` - Serves the `train` set and every validated set.
    ///
    /// # Returns
    /// The session or `InvalidConfiguration` if some option is wrong.
    pub fn new(
        config: TrainingConfig,
        model: M,
        provider: &'a dyn DatasetProvider,
    ) -> Result<Self> {
        config.validate()?;
        let settings = config.derive()?;

        info!(
            hash = settings.hash.as_str();
            "checkpoints go to {}",
            settings.checkpoint_dir.display()
        );

        Ok(Self {
            config,
            settings,
            model,
            provider,
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Builds every component, restores the configured checkpoint and
    /// trains, or only validates in validation-only mode.
    pub fn run(self) -> Result<TrainingOutcome> {
        let Self {
            config,
            settings,
            model,
            provider,
            show_progress,
        } = self;

        let reporter: Arc<dyn Reporter> = Arc::new(LogReporter);
        let mut executor = build_executor(&config, model, Arc::clone(&reporter))?;

        let checkpoints =
            CheckpointStore::new(&settings.checkpoint_dir, config.checkpoints_to_keep);
        restore(config.restore_model, &checkpoints, &mut executor)?;

        let runner = ValidationRunner::new(config.nclasses)
            .with_reporter(reporter)
            .with_artifacts(ArtifactOptions {
                dir: Some(settings.checkpoint_dir.clone()),
                save_samples: config.save_samples,
                save_heatmap: config.save_heatmap,
            });
        let mut evaluator = SetEvaluator::new(provider, runner);

        if config.do_validation_only {
            return validate_only(&executor, &mut evaluator, &config.val_on_sets);
        }

        let train = provider.open(TRAIN)?;
        if train.nclasses() != config.nclasses {
            return Err(OrchestratorError::InvalidConfiguration(format!(
                "the train set has {} classes but nclasses is {}",
                train.nclasses(),
                config.nclasses
            )));
        }

        let train = if config.use_threads {
            BatchQueue::prefetching(train, config.nthreads, config.queue_size)?
        } else {
            BatchQueue::synchronous(train)
        };

        let schedule = Schedule::new(&config, &settings);
        TrainingLoop::new(executor, train, evaluator, checkpoints, schedule)?
            .with_sets(config.val_on_sets)
            .with_progress(show_progress)
            .run()
    }
}

fn build_executor<M: Model>(
    config: &TrainingConfig,
    model: M,
    reporter: Arc<dyn Reporter>,
) -> Result<StepExecutor<M>> {
    let specs = model.params();
    let mut rng = StdRng::seed_from_u64(config.random_seed);
    let store = ParameterStore::new(specs.clone(), &mut rng)?;
    let optimizer = config.optimizer.build(&specs);

    let devices = DevicePool::new(&config.devices)?;
    info!(
        params = store.len(),
        scalars = store.num_scalars();
        "building towers on {devices:?}"
    );

    let mut executor = StepExecutor::new(
        model,
        config.loss_fn.build(),
        store,
        optimizer,
        devices,
        config.nclasses,
    )?
    .with_weight_decay(config.weight_decay)
    .with_reporter(reporter);

    if config.gradient_histogram_buckets > 0 {
        executor = executor.with_histograms(config.gradient_histogram_buckets);
    }

    Ok(executor)
}

fn restore<M: Model>(
    mode: RestoreMode,
    checkpoints: &CheckpointStore,
    executor: &mut StepExecutor<M>,
) -> Result<()> {
    let state = match mode {
        RestoreMode::None => return Ok(()),
        RestoreMode::Latest => checkpoints.load_latest()?,
        RestoreMode::Best => checkpoints.load_best()?,
    };

    let Some(state) = state else {
        info!(
            "no checkpoint to restore in {}, starting from scratch",
            checkpoints.dir().display()
        );
        return Ok(());
    };

    let step = state.global_step;
    executor.restore(state)?;
    info!(step = step; "Restored the model from {}", checkpoints.dir().display());
    Ok(())
}
