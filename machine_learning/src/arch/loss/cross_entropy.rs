use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use super::LossFn;
use crate::arch::softmax;

const EPS: f32 = 1e-7;

/// Cross entropy computed straight from logits, fusing the softmax for stability.
#[derive(Debug, Default, Clone, Copy)]
pub struct SparseSoftmaxCrossEntropy;

/// Cross entropy over softmax probabilities, clamped away from zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct SparseCrossEntropy;

impl LossFn for SparseSoftmaxCrossEntropy {
    fn takes_logits(&self) -> bool {
        true
    }

    fn loss(&self, labels: ArrayView1<usize>, y: ArrayView2<f32>) -> Array1<f32> {
        let ncols = y.ncols();
        y.rows()
            .into_iter()
            .zip(labels)
            .map(|(row, &label)| {
                if label >= ncols {
                    return 0.;
                }
                let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                let lse = row.mapv(|v| (v - max).exp()).sum().ln() + max;
                lse - row[label]
            })
            .collect()
    }

    fn loss_prime(&self, labels: ArrayView1<usize>, y: ArrayView2<f32>) -> Array2<f32> {
        let ncols = y.ncols();
        let mut d = softmax(y);

        for (mut row, &label) in d.axis_iter_mut(Axis(0)).zip(labels) {
            if label >= ncols {
                row.fill(0.);
                continue;
            }
            row[label] -= 1.;
        }

        d
    }
}

impl LossFn for SparseCrossEntropy {
    fn takes_logits(&self) -> bool {
        false
    }

    fn loss(&self, labels: ArrayView1<usize>, y: ArrayView2<f32>) -> Array1<f32> {
        let ncols = y.ncols();
        y.rows()
            .into_iter()
            .zip(labels)
            .map(|(row, &label)| {
                if label < ncols {
                    -row[label].max(EPS).ln()
                } else {
                    0.
                }
            })
            .collect()
    }

    fn loss_prime(&self, labels: ArrayView1<usize>, y: ArrayView2<f32>) -> Array2<f32> {
        let ncols = y.ncols();
        let mut d = Array2::zeros(y.raw_dim());

        for ((mut d_row, row), &label) in d.rows_mut().into_iter().zip(y.rows()).zip(labels) {
            if label < ncols {
                d_row[label] = -1. / row[label].max(EPS);
            }
        }

        d
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn fused_and_plain_cross_entropy_agree() {
        let logits = array![[2f32, 0.5, -1.], [0., 0., 0.]];
        let labels = array![0usize, 2];

        let fused = SparseSoftmaxCrossEntropy.loss(labels.view(), logits.view());
        let plain = SparseCrossEntropy.loss(labels.view(), softmax(logits.view()).view());

        for (a, b) in fused.iter().zip(plain.iter()) {
            assert!((a - b).abs() < 1e-5, "{a} != {b}");
        }
    }

    #[test]
    fn uniform_logits_cost_ln_nclasses() {
        let logits = array![[0f32, 0., 0., 0.]];
        let loss = SparseSoftmaxCrossEntropy.loss(array![3usize].view(), logits.view());
        assert!((loss[0] - 4f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn fused_gradient_is_probs_minus_one_hot() {
        let logits = array![[0f32, 0.]];
        let d = SparseSoftmaxCrossEntropy.loss_prime(array![1usize].view(), logits.view());
        assert_eq!(d, array![[0.5f32, -0.5]]);
    }

    #[test]
    fn void_labels_produce_nothing() {
        let logits = array![[1f32, 2.]];
        let labels = array![7usize];

        assert_eq!(SparseSoftmaxCrossEntropy.loss(labels.view(), logits.view())[0], 0.);
        assert_eq!(
            SparseSoftmaxCrossEntropy.loss_prime(labels.view(), logits.view()),
            array![[0f32, 0.]]
        );
        assert_eq!(SparseCrossEntropy.loss(labels.view(), logits.view())[0], 0.);
    }
}
