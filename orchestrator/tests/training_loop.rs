mod common;

use std::fs;

use common::{Exploding, Scaled, Scripted, executor, schedule, train_queue};
use orchestrator::{CheckpointStore, OrchestratorError, Termination, TrainingLoop};

#[test]
fn best_checkpoints_follow_ties_and_improvements() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = CheckpointStore::new(dir.path(), 2);

    // validations land on epochs 0, 2, 4 and 6
    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0"]),
        train_queue(4, 2),
        Scripted::new(&[0.5, 0.5, 0.4, 0.6]),
        checkpoints.clone(),
        schedule(7, 0, 100),
    )
    .unwrap();

    let outcome = training.run().unwrap();

    assert_eq!(outcome.history, vec![0.5, 0.5, 0.4, 0.6]);
    assert_eq!(outcome.best_passes, vec![1, 2, 4]);
    assert_eq!(outcome.best_valid_miou, Some(0.6));
    assert_eq!(outcome.termination, Termination::MaxEpochsReached);
    assert_eq!(outcome.epochs_run, 7);
    assert_eq!(outcome.iterations, 14);

    let epochs: Vec<usize> = training.evaluator().calls.iter().map(|(_, e)| *e).collect();
    assert_eq!(epochs, vec![0, 2, 4, 6]);

    let (step, _) = checkpoints.best().unwrap().unwrap();
    assert_eq!(step, 14);
    assert_eq!(checkpoints.rolling().unwrap().len(), 2);
}

#[test]
fn early_stop_fires_after_min_epochs_without_improvement() {
    let dir = tempfile::tempdir().unwrap();

    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0"]),
        train_queue(4, 2),
        Scripted::new(&[0.5, 0.4]),
        CheckpointStore::new(dir.path(), 2),
        schedule(10, 2, 1),
    )
    .unwrap();

    let outcome = training.run().unwrap();

    assert_eq!(outcome.termination, Termination::EarlyStopped);
    assert_eq!(outcome.epochs_run, 3);
    assert_eq!(outcome.history, vec![0.5, 0.4]);
    assert_eq!(outcome.best_valid_miou, Some(0.5));
}

#[test]
fn improving_postpones_early_stop() {
    let dir = tempfile::tempdir().unwrap();

    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0"]),
        train_queue(4, 2),
        Scripted::new(&[0.5, 0.6, 0.55]),
        CheckpointStore::new(dir.path(), 2),
        schedule(10, 2, 1),
    )
    .unwrap();

    let outcome = training.run().unwrap();

    assert_eq!(outcome.termination, Termination::EarlyStopped);
    assert_eq!(outcome.epochs_run, 4);
    assert_eq!(outcome.best_passes, vec![1, 2]);
}

#[test]
fn two_devices_run_every_configured_epoch() {
    let dir = tempfile::tempdir().unwrap();

    // 5 samples in batches of 2: the last batch leaves one device idle
    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0", "cpu:1"]),
        train_queue(5, 2),
        Scripted::new(&[0.3, 0.3]),
        CheckpointStore::new(dir.path(), 2),
        schedule(3, 1, 10),
    )
    .unwrap();

    let outcome = training.run().unwrap();

    assert_eq!(outcome.best_valid_miou, Some(0.3));
    assert_eq!(outcome.history, vec![0.3, 0.3]);
    assert_eq!(outcome.epochs_run, 3);
    assert_eq!(outcome.iterations, 9);
    assert_eq!(outcome.termination, Termination::MaxEpochsReached);
    assert_eq!(training.executor().global_step(), 9);
}

#[test]
fn the_last_epoch_and_early_stop_validate_once() {
    let dir = tempfile::tempdir().unwrap();

    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0"]),
        train_queue(2, 2),
        Scripted::new(&[0.5, 0.5]),
        CheckpointStore::new(dir.path(), 2),
        schedule(2, 0, 1),
    )
    .unwrap();

    let outcome = training.run().unwrap();

    assert_eq!(training.evaluator().calls.len(), 2);
    assert_eq!(outcome.epochs_run, 2);
}

#[test]
fn every_configured_set_is_validated() {
    let dir = tempfile::tempdir().unwrap();

    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0"]),
        train_queue(2, 2),
        Scripted::new(&[0.9, 0.2]),
        CheckpointStore::new(dir.path(), 2),
        schedule(1, 0, 10),
    )
    .unwrap()
    .with_sets(vec!["train".to_string(), "valid".to_string()]);

    let outcome = training.run().unwrap();

    assert_eq!(outcome.history, vec![0.2]);
    let sets: Vec<&str> = training.evaluator().calls.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(sets, vec!["train", "valid"]);
}

#[test]
fn training_needs_the_valid_set() {
    let dir = tempfile::tempdir().unwrap();

    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0"]),
        train_queue(2, 2),
        Scripted::new(&[]),
        CheckpointStore::new(dir.path(), 2),
        schedule(1, 0, 10),
    )
    .unwrap()
    .with_sets(vec!["test".to_string()]);

    assert!(matches!(
        training.run(),
        Err(OrchestratorError::InvalidConfiguration(_))
    ));
}

#[test]
fn checkpoint_failures_do_not_stop_training() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    fs::write(&blocker, b"").unwrap();

    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0"]),
        train_queue(4, 2),
        Scripted::new(&[0.5, 0.7]),
        CheckpointStore::new(&blocker, 2),
        schedule(3, 0, 10),
    )
    .unwrap();

    let outcome = training.run().unwrap();

    assert_eq!(outcome.epochs_run, 3);
    assert_eq!(outcome.best_valid_miou, Some(0.7));
}

#[test]
fn model_errors_end_the_run_untouched() {
    let dir = tempfile::tempdir().unwrap();

    let mut training = TrainingLoop::new(
        executor(Exploding, &["cpu:0"]),
        train_queue(2, 2),
        Scripted::new(&[0.5]),
        CheckpointStore::new(dir.path(), 2),
        schedule(3, 0, 10),
    )
    .unwrap();

    let err = training.run().unwrap_err();

    assert!(matches!(err, OrchestratorError::ModelBuilder(_)));
    assert_eq!(err.to_string(), "model exploded");
    assert!(training.evaluator().calls.is_empty());
}

#[test]
fn a_fresh_run_replaces_checkpoints_left_by_a_longer_one() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("rolling.ckpt-99.json"), b"{}").unwrap();
    fs::write(dir.path().join("rolling.ckpt-100.json"), b"{}").unwrap();
    let checkpoints = CheckpointStore::new(dir.path(), 2);

    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0"]),
        train_queue(4, 2),
        Scripted::new(&[0.5, 0.5]),
        checkpoints.clone(),
        schedule(3, 0, 10),
    )
    .unwrap();

    training.run().unwrap();

    let steps: Vec<u64> = checkpoints
        .rolling()
        .unwrap()
        .into_iter()
        .map(|(step, _)| step)
        .collect();
    assert_eq!(steps, vec![5, 6]);
    assert_eq!(checkpoints.load_latest().unwrap().unwrap().global_step, 6);
}

#[test]
fn full_batches_must_feed_every_device() {
    let dir = tempfile::tempdir().unwrap();

    let mut training = TrainingLoop::new(
        executor(Scaled, &["cpu:0", "cpu:1"]),
        train_queue(1, 1),
        Scripted::new(&[0.5]),
        CheckpointStore::new(dir.path(), 2),
        schedule(1, 0, 10),
    )
    .unwrap();

    assert!(matches!(
        training.run(),
        Err(OrchestratorError::InvalidConfiguration(_))
    ));
    assert_eq!(training.executor().global_step(), 0);
}
