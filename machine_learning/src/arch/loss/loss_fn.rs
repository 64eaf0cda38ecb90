use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// A per-location loss for dense classification.
///
/// Both methods receive one row of `y` per location and one label per row.
/// Labels `>= y.ncols()` are void: they contribute no loss and no gradient.
pub trait LossFn: Send + Sync {
    /// Whether `y` holds raw logits (`true`) or softmax probabilities (`false`).
    fn takes_logits(&self) -> bool;

    /// Returns the loss of every location.
    fn loss(&self, labels: ArrayView1<usize>, y: ArrayView2<f32>) -> Array1<f32>;

    /// Returns the derivative of the summed loss with respect to `y`.
    fn loss_prime(&self, labels: ArrayView1<usize>, y: ArrayView2<f32>) -> Array2<f32>;
}
