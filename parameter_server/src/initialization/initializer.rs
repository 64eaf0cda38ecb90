use machine_learning::arch::{ParamInit, ParamSpec};
use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use super::DistributionErr;
use crate::storage::{Result, StoreErr};

/// A ready to sample version of a `ParamInit`.
#[derive(Debug, Clone, Copy)]
pub enum Initializer {
    Const(f32),
    Uniform(Uniform<f32>),
    Normal(Normal<f32>),
}

impl Initializer {
    /// Builds the distribution `init` declares.
    ///
    /// Xavier uniform samples from `[-r, r)` with `r = sqrt(6 / (fan_in + fan_out))`.
    ///
    /// # Errors
    /// Returns a `DistributionErr` if the declared range or deviation is unusable.
    pub fn new(init: &ParamInit) -> std::result::Result<Self, DistributionErr> {
        let uniform = |low: f32, high: f32| {
            Uniform::new(low, high)
                .map(Self::Uniform)
                .map_err(|e| DistributionErr::uniform(low, high, e))
        };

        match *init {
            ParamInit::Const { value } => Ok(Self::Const(value)),
            ParamInit::Uniform { low, high } => uniform(low, high),
            ParamInit::XavierUniform { fan_in, fan_out } => {
                let r = (6. / (fan_in + fan_out).max(1) as f32).sqrt();
                uniform(-r, r)
            }
            ParamInit::Normal { mean, std_dev } => Normal::new(mean, std_dev)
                .map(Self::Normal)
                .map_err(|e| DistributionErr::normal(std_dev, e)),
        }
    }

    /// Draws `len` values, in row major order.
    pub fn fill<R: Rng>(&self, len: usize, rng: &mut R) -> Vec<f32> {
        match self {
            Initializer::Const(value) => vec![*value; len],
            Initializer::Uniform(dist) => dist.sample_iter(rng).take(len).collect(),
            Initializer::Normal(dist) => dist.sample_iter(rng).take(len).collect(),
        }
    }
}

/// Creates the initial value of a parameter.
///
/// Parameters draw from `rng` in declaration order, so a model initialized
/// twice from the same seed gets the same values.
///
/// # Arguments
/// * `spec` - The parameter to initialize.
/// * `rng` - The random number generator shared by every parameter of the model.
///
/// # Returns
/// The initial value of the parameter or an error naming it if its distribution is invalid.
pub fn initialize<R: Rng>(spec: &ParamSpec, rng: &mut R) -> Result<ArrayD<f32>> {
    let initializer = Initializer::new(&spec.init).map_err(|source| StoreErr::Init {
        param: spec.name.clone(),
        source,
    })?;

    let len = spec.len();
    let values = initializer.fill(len, rng);
    ArrayD::from_shape_vec(IxDyn(&spec.shape), values).map_err(|_| StoreErr::SizeMismatch {
        what: "initial values",
        got: len,
        expected: spec.shape.iter().product(),
    })
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn constant_params_are_filled() {
        let spec = ParamSpec::new("b", vec![2, 3], ParamInit::Const { value: 0.25 });
        let value = initialize(&spec, &mut StdRng::seed_from_u64(1)).unwrap();

        assert_eq!(value.shape(), &[2, 3]);
        assert!(value.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn xavier_stays_in_range() {
        let spec = ParamSpec::new(
            "w",
            vec![4, 2],
            ParamInit::XavierUniform {
                fan_in: 4,
                fan_out: 2,
            },
        );
        let value = initialize(&spec, &mut StdRng::seed_from_u64(1)).unwrap();
        let range = (6f32 / 6.).sqrt();

        assert!(value.iter().all(|v| v.abs() <= range));
    }

    #[test]
    fn same_seed_same_values() {
        let spec = ParamSpec::new("w", vec![8], ParamInit::Normal { mean: 0., std_dev: 1. });

        let a = initialize(&spec, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = initialize(&spec, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn constants_leave_the_rng_untouched() {
        let mut rng = StdRng::seed_from_u64(3);
        Initializer::Const(1.).fill(16, &mut rng);
        let after: f32 = rng.random();

        let fresh: f32 = StdRng::seed_from_u64(3).random();
        assert_eq!(after, fresh);
    }

    #[test]
    fn invalid_distributions_name_the_param() {
        let spec = ParamSpec::new("w", vec![2], ParamInit::Uniform { low: 1., high: -1. });
        let err = initialize(&spec, &mut StdRng::seed_from_u64(7)).unwrap_err();

        assert!(matches!(
            err,
            StoreErr::Init { ref param, source: DistributionErr::Uniform { .. } } if param == "w"
        ));
    }
}
