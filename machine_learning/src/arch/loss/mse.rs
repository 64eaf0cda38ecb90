use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use super::LossFn;

/// Squared error between the predicted probabilities and the one-hot encoded labels.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }

    fn diff(labels: ArrayView1<usize>, y: ArrayView2<f32>) -> Array2<f32> {
        let ncols = y.ncols();
        let mut diff = y.to_owned();

        for (mut row, &label) in diff.axis_iter_mut(Axis(0)).zip(labels) {
            if label >= ncols {
                row.fill(0.);
                continue;
            }
            row[label] -= 1.;
        }

        diff
    }
}

impl LossFn for Mse {
    fn takes_logits(&self) -> bool {
        false
    }

    fn loss(&self, labels: ArrayView1<usize>, y: ArrayView2<f32>) -> Array1<f32> {
        Self::diff(labels, y)
            .mapv(|x| x.powi(2))
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(y.nrows()))
    }

    fn loss_prime(&self, labels: ArrayView1<usize>, y: ArrayView2<f32>) -> Array2<f32> {
        let ncols = y.ncols().max(1);
        Self::diff(labels, y) * (2.0 / ncols as f32)
    }
}
