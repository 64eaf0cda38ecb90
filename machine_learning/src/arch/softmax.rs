use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Normalized exponential over the class axis (the columns) of `logits`.
pub fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut probs = logits.to_owned();

    for mut row in probs.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }

    probs
}

/// Propagates `d_probs`, the derivative with respect to the output of `softmax`,
/// back to its input.
pub fn softmax_backward(probs: ArrayView2<f32>, d_probs: ArrayView2<f32>) -> Array2<f32> {
    let dot = (&probs * &d_probs).sum_axis(Axis(1)).insert_axis(Axis(1));
    &probs * &(&d_probs - &dot)
}

/// The index of the highest score of each row, ties go to the lowest index.
pub fn argmax(scores: ArrayView2<f32>) -> Array1<usize> {
    scores
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                    if v > max { (i, v) } else { (best, max) }
                })
                .0
        })
        .collect()
}
