mod common;

use std::io;

use common::{Exploding, Scaled, executor, one_hot_batch, perfect_batch};
use machine_learning::arch::PixelLinear;
use ndarray::{ArrayD, IxDyn};
use parameter_server::{OptimizerKind, OptimizerState};
use worker::{ChunkSplitter, WorkerErr, data::Batch};

const GD: OptimizerKind = OptimizerKind::GradientDescent { lr: 0.1 };

fn pixel_batch(n: usize) -> Batch {
    let inputs = ArrayD::from_shape_fn(IxDyn(&[n, 2, 2, 3]), |ix| {
        ((ix[0] * 7 + ix[1] * 3 + ix[2] + ix[3]) % 5) as f32 / 5.
    });
    let labels = ArrayD::from_shape_fn(IxDyn(&[n, 2, 2]), |ix| (ix[0] + ix[1] + ix[2]) % 3);
    Batch::new(inputs, labels).unwrap()
}

#[test]
fn training_updates_the_parameters_once_per_step() {
    let mut exec = executor(PixelLinear::new(3, 3), &["cpu:0", "cpu:1"], GD, 3);
    let splitter = ChunkSplitter::new(2, &[2, 2]).unwrap();
    let batch = pixel_batch(4);
    let before = exec.store().values().to_vec();

    let out = exec.run_training_step(&batch, &splitter.plan(4)).unwrap();

    assert!(out.updated);
    assert!(out.loss > 0.);
    assert_eq!(exec.global_step(), 1);
    assert_ne!(exec.store().values(), before.as_slice());

    exec.run_training_step(&batch, &splitter.plan(4)).unwrap();
    assert_eq!(exec.global_step(), 2);
}

#[test]
fn splitting_across_devices_matches_a_single_device() {
    let batch = pixel_batch(4);

    let mut single = executor(PixelLinear::new(3, 3), &["cpu:0"], GD, 3);
    let single_plan = ChunkSplitter::new(1, &[2, 2]).unwrap().plan(4);
    let mut split = executor(PixelLinear::new(3, 3), &["cpu:0", "cpu:1"], GD, 3);
    let split_plan = ChunkSplitter::new(2, &[2, 2]).unwrap().plan(4);

    let a = single.run_training_step(&batch, &single_plan).unwrap();
    let b = split.run_training_step(&batch, &split_plan).unwrap();
    assert!((a.loss - b.loss).abs() < 1e-5);

    for (x, y) in single.store().values().iter().zip(split.store().values()) {
        for (x, y) in x.iter().zip(y.iter()) {
            assert!((x - y).abs() < 1e-5, "{x} != {y}");
        }
    }
}

#[test]
fn inference_keeps_the_batch_order() {
    let labels = vec![vec![0, 1], vec![2, 2], vec![1, 0], vec![3, 1], vec![2, 0]];
    let batch = perfect_batch(&labels, 4);
    let scaled = Scaled {
        nclasses: 4,
        with_unused: false,
    };
    let exec = executor(scaled, &["cpu:0", "cpu:1", "cpu:2"], GD, 4);
    let plan = ChunkSplitter::new(3, &[2]).unwrap().plan(5);
    assert_eq!(plan.inputs(), &[2, 2, 1]);

    let before = exec.store().values().to_vec();
    let out = exec.run_inference_step(&batch, &plan).unwrap();

    assert_eq!(&out.predictions, batch.labels());
    assert_eq!(out.confidence.shape(), &[5, 2]);
    assert_eq!(exec.store().values(), before.as_slice());
}

#[test]
fn short_batches_leave_devices_idle() {
    let batch = perfect_batch(&[vec![1, 1]], 2);
    let scaled = Scaled {
        nclasses: 2,
        with_unused: false,
    };
    let mut exec = executor(scaled, &["cpu:0", "cpu:1", "cpu:2"], GD, 2);
    let plan = ChunkSplitter::new(3, &[2]).unwrap().plan(1);

    let out = exec.run_training_step(&batch, &plan).unwrap();
    assert!(out.loss > 0.);
    assert_eq!(exec.global_step(), 1);
}

#[test]
fn params_without_gradients_are_left_alone() {
    let batch = one_hot_batch(&[vec![0, 1]], &[vec![1, 1]], 2);
    let scaled = Scaled {
        nclasses: 2,
        with_unused: true,
    };
    let momentum = OptimizerKind::Momentum { lr: 0.1, mu: 0.9 };
    let mut exec = executor(scaled, &["cpu:0", "cpu:1"], momentum, 2);
    let plan = ChunkSplitter::new(2, &[2]).unwrap().plan(1);

    exec.run_training_step(&batch, &plan).unwrap();

    assert_eq!(exec.store().values()[1], ArrayD::<f32>::zeros(IxDyn(&[2])));
    let OptimizerState::Momentum { velocity } = exec.training_state().optimizer else {
        panic!("expected a momentum state");
    };
    assert_eq!(velocity[1], ArrayD::<f32>::zeros(IxDyn(&[2])));
    assert_ne!(velocity[0], ArrayD::<f32>::zeros(IxDyn(&[1])));
}

#[test]
fn model_errors_come_back_untouched() {
    let mut exec = executor(Exploding, &["cpu:0"], GD, 2);
    let batch = perfect_batch(&[vec![0]], 2);
    let plan = ChunkSplitter::new(1, &[1]).unwrap().plan(1);

    let err = exec.run_training_step(&batch, &plan).unwrap_err();

    assert_eq!(err.to_string(), "model exploded");
    let WorkerErr::ModelBuilder(source) = err else {
        panic!("expected a model builder error");
    };
    assert!(source.downcast_ref::<io::Error>().is_some());
    assert_eq!(exec.global_step(), 0);
}

#[test]
fn plans_must_fit_the_devices_and_the_batch() {
    let mut exec = executor(PixelLinear::new(3, 3), &["cpu:0", "cpu:1"], GD, 3);
    let batch = pixel_batch(4);

    let wrong_devices = ChunkSplitter::new(3, &[2, 2]).unwrap().plan(4);
    assert!(matches!(
        exec.run_training_step(&batch, &wrong_devices),
        Err(WorkerErr::InvalidConfiguration(_))
    ));

    let wrong_size = ChunkSplitter::new(2, &[2, 2]).unwrap().plan(3);
    assert!(matches!(
        exec.run_inference_step(&batch, &wrong_size),
        Err(WorkerErr::InvalidConfiguration(_))
    ));
}

#[test]
fn training_state_restores_into_a_fresh_executor() {
    let adam = OptimizerKind::default();
    let mut trained = executor(PixelLinear::new(3, 3), &["cpu:0"], adam, 3);
    let plan = ChunkSplitter::new(1, &[2, 2]).unwrap().plan(2);
    trained.run_training_step(&pixel_batch(2), &plan).unwrap();

    let json = serde_json::to_string(&trained.training_state()).unwrap();

    let mut fresh = executor(PixelLinear::new(3, 3), &["cpu:0"], adam, 3);
    fresh.restore(serde_json::from_str(&json).unwrap()).unwrap();

    assert_eq!(fresh.global_step(), 1);
    assert_eq!(fresh.training_state(), trained.training_state());
}

#[test]
fn restore_rejects_other_optimizers() {
    let trained = executor(PixelLinear::new(3, 3), &["cpu:0"], GD, 3);
    let state = trained.training_state();

    let mut other = executor(PixelLinear::new(3, 3), &["cpu:0"], OptimizerKind::default(), 3);
    let before = other.training_state();

    assert!(other.restore(state).is_err());
    assert_eq!(other.training_state(), before);
}
