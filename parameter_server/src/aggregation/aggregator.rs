use std::collections::BTreeMap;

use log::trace;
use machine_learning::{Gradient, SparseGradient, arch::ParamId};
use ndarray::ArrayD;
use rayon::prelude::*;

use super::Histogram;
use crate::storage::{Result, StoreErr};

/// One gradient per parameter, averaged across every tower that produced one.
///
/// Parameters no tower computed a gradient for have no entry, which is not the
/// same as a zero gradient.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedGradients(BTreeMap<ParamId, Gradient>);

impl AggregatedGradients {
    pub fn get(&self, id: ParamId) -> Option<&Gradient> {
        self.0.get(&id)
    }

    pub fn contains(&self, id: ParamId) -> bool {
        self.0.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Gradient)> {
        self.0.iter().map(|(&id, grad)| (id, grad))
    }
}

impl FromIterator<(ParamId, Gradient)> for AggregatedGradients {
    fn from_iter<T: IntoIterator<Item = (ParamId, Gradient)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Averages per-parameter gradients across towers.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientAggregator {
    histogram_buckets: usize,
}

impl GradientAggregator {
    /// Creates a new `GradientAggregator`.
    ///
    /// # Arguments
    /// * `histogram_buckets` - The resolution of the gradient histograms, zero disables them.
    pub fn new(histogram_buckets: usize) -> Self {
        Self { histogram_buckets }
    }

    /// Computes the unweighted mean, per parameter, of the gradients produced by `towers`.
    ///
    /// A tower that returned `None` for a parameter doesn't count towards its mean.
    /// When every contribution is sparse the result stays sparse: indices and
    /// values are concatenated and scaled, never densified.
    ///
    /// # Arguments
    /// * `towers` - The gradients of each tower, in parameter order.
    ///
    /// # Returns
    /// The aggregated gradients or an error if the towers disagree on the parameters.
    pub fn aggregate<'a, I>(&self, towers: I) -> Result<AggregatedGradients>
    where
        I: IntoIterator<Item = &'a [Option<Gradient>]>,
    {
        let towers: Vec<_> = towers.into_iter().collect();
        let Some(nparams) = towers.first().map(|grads| grads.len()) else {
            return Ok(AggregatedGradients::default());
        };

        if let Some(other) = towers.iter().find(|grads| grads.len() != nparams) {
            return Err(StoreErr::SizeMismatch {
                what: "tower gradients",
                got: other.len(),
                expected: nparams,
            });
        }

        let means = (0..nparams)
            .into_par_iter()
            .map(|i| {
                let parts: Vec<&Gradient> =
                    towers.iter().filter_map(|grads| grads[i].as_ref()).collect();
                let mean = mean(ParamId(i), &parts)?;
                Ok(mean.map(|grad| (ParamId(i), grad)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(means.into_iter().flatten().collect())
    }

    /// Summarizes every aggregated gradient for observability.
    ///
    /// Gradients that can't be summarized (empty or non finite) are skipped.
    pub fn histograms(&self, grads: &AggregatedGradients) -> Vec<(ParamId, Histogram)> {
        if self.histogram_buckets == 0 {
            return Vec::new();
        }

        grads
            .iter()
            .filter_map(|(id, grad)| {
                Histogram::from_values(grad.values().iter().copied(), self.histogram_buckets)
                    .map(|hist| (id, hist))
            })
            .collect()
    }
}

fn mean(id: ParamId, parts: &[&Gradient]) -> Result<Option<Gradient>> {
    let Some(first) = parts.first() else {
        trace!(param = id.0; "no tower produced a gradient");
        return Ok(None);
    };

    if let Some(other) = parts.iter().find(|grad| grad.shape() != first.shape()) {
        return Err(StoreErr::ShapeMismatch {
            param: format!("#{}", id.0),
            got: other.shape().to_vec(),
            expected: first.shape().to_vec(),
        });
    }

    let scale = 1. / parts.len() as f32;

    let sparse: Option<Vec<&SparseGradient>> = parts
        .iter()
        .map(|grad| match grad {
            Gradient::Sparse(sparse) => Some(sparse),
            Gradient::Dense(_) => None,
        })
        .collect();

    let grad = match sparse {
        Some(sparse) => Gradient::Sparse(SparseGradient::concat(&sparse)?).scaled(scale),
        None => {
            let mut sum = ArrayD::zeros(first.shape());
            for grad in parts {
                match grad {
                    Gradient::Dense(dense) => sum += dense,
                    Gradient::Sparse(sparse) => sum += &sparse.to_dense(),
                }
            }
            Gradient::Dense(sum * scale)
        }
    };

    Ok(Some(grad))
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn dense(values: ArrayD<f32>) -> Option<Gradient> {
        Some(Gradient::Dense(values))
    }

    #[test]
    fn missing_gradients_dont_count() {
        let g1 = array![1f32, 2.].into_dyn();
        let g3 = array![3f32, 6.].into_dyn();
        let towers = [vec![dense(g1)], vec![None], vec![dense(g3)]];

        let agg = GradientAggregator::default()
            .aggregate(towers.iter().map(Vec::as_slice))
            .unwrap();

        assert_eq!(
            agg.get(ParamId(0)),
            Some(&Gradient::Dense(array![2f32, 4.].into_dyn()))
        );
    }

    #[test]
    fn params_without_contributions_have_no_entry() {
        let towers = [
            vec![None, dense(array![1f32].into_dyn())],
            vec![None, dense(array![0f32].into_dyn())],
        ];

        let agg = GradientAggregator::default()
            .aggregate(towers.iter().map(Vec::as_slice))
            .unwrap();

        assert!(!agg.contains(ParamId(0)));
        assert_eq!(agg.len(), 1);
        assert_eq!(
            agg.get(ParamId(1)),
            Some(&Gradient::Dense(array![0.5f32].into_dyn()))
        );
    }

    #[test]
    fn sparse_gradients_stay_sparse() {
        let a = SparseGradient::new(vec![0], array![[2f32, 2.]].into_dyn(), vec![3, 2]).unwrap();
        let b = SparseGradient::new(vec![2], array![[4f32, 4.]].into_dyn(), vec![3, 2]).unwrap();
        let towers = [
            vec![Some(Gradient::Sparse(a))],
            vec![Some(Gradient::Sparse(b))],
        ];

        let agg = GradientAggregator::default()
            .aggregate(towers.iter().map(Vec::as_slice))
            .unwrap();

        let Some(Gradient::Sparse(grad)) = agg.get(ParamId(0)) else {
            panic!("expected a sparse gradient");
        };
        assert_eq!(grad.indices(), &[0, 2]);
        assert_eq!(
            grad.to_dense(),
            array![[1f32, 1.], [0., 0.], [2., 2.]].into_dyn()
        );
    }

    #[test]
    fn mixed_gradients_are_densified() {
        let a = SparseGradient::new(vec![1], array![[2f32]].into_dyn(), vec![2, 1]).unwrap();
        let towers = [
            vec![Some(Gradient::Sparse(a))],
            vec![dense(array![[2f32], [2.]].into_dyn())],
        ];

        let agg = GradientAggregator::default()
            .aggregate(towers.iter().map(Vec::as_slice))
            .unwrap();

        assert_eq!(
            agg.get(ParamId(0)),
            Some(&Gradient::Dense(array![[1f32], [2.]].into_dyn()))
        );
    }

    #[test]
    fn towers_must_agree_on_the_params() {
        let towers = [vec![None], vec![None, None]];
        let res = GradientAggregator::default().aggregate(towers.iter().map(Vec::as_slice));
        assert!(res.is_err());
    }

    #[test]
    fn histograms_skip_when_disabled() {
        let agg = AggregatedGradients::from_iter([(
            ParamId(0),
            Gradient::Dense(array![1f32, 2.].into_dyn()),
        )]);

        assert!(GradientAggregator::new(0).histograms(&agg).is_empty());
        assert_eq!(GradientAggregator::new(4).histograms(&agg).len(), 1);
    }
}
