use ndarray::{Array2, Axis};

/// A running `nclasses x nclasses` confusion matrix, rows are ground truth
/// classes and columns predicted ones.
///
/// Locations labeled `>= nclasses` (void) are never counted.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    counts: Array2<u64>,
}

impl ConfusionMatrix {
    pub fn new(nclasses: usize) -> Self {
        Self {
            counts: Array2::zeros((nclasses, nclasses)),
        }
    }

    pub fn nclasses(&self) -> usize {
        self.counts.nrows()
    }

    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    /// Forgets every accumulated count.
    pub fn reset(&mut self) {
        self.counts.fill(0);
    }

    /// Folds a batch of labels and the matching predictions into the matrix.
    ///
    /// # Arguments
    /// * `labels` - The ground truth of every location.
    /// * `predictions` - The predicted class of every location.
    pub fn update<'a, L, P>(&mut self, labels: L, predictions: P)
    where
        L: IntoIterator<Item = &'a usize>,
        P: IntoIterator<Item = &'a usize>,
    {
        let nclasses = self.nclasses();

        for (&label, &pred) in labels.into_iter().zip(predictions) {
            if label < nclasses && pred < nclasses {
                self.counts[[label, pred]] += 1;
            }
        }
    }

    /// Returns the IoU of every class, `None` for classes that never appear
    /// in the ground truth nor in the predictions.
    pub fn per_class_iou(&self) -> Vec<Option<f64>> {
        let gt = self.counts.sum_axis(Axis(1));
        let pred = self.counts.sum_axis(Axis(0));

        (0..self.nclasses())
            .map(|c| {
                let tp = self.counts[[c, c]];
                let union = gt[c] + pred[c] - tp;
                (union > 0).then(|| tp as f64 / union as f64)
            })
            .collect()
    }

    /// Returns the unweighted mean of the IoU of every class that appears,
    /// zero when none does.
    pub fn mean_iou(&self) -> f64 {
        let ious: Vec<f64> = self.per_class_iou().into_iter().flatten().collect();

        if ious.is_empty() {
            return 0.;
        }

        ious.iter().sum::<f64>() / ious.len() as f64
    }
}
