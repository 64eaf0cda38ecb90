use std::{
    error::Error,
    fmt::{self, Display},
};

use rand_distr::{NormalError, uniform::Error as UniformError};

/// The distribution declared by a parameter's initializer can't be sampled.
#[derive(Debug, Clone, PartialEq)]
pub enum DistributionErr {
    Uniform { low: f32, high: f32, reason: String },
    Normal { std_dev: f32, reason: String },
}

impl DistributionErr {
    pub(super) fn uniform(low: f32, high: f32, err: UniformError) -> Self {
        Self::Uniform {
            low,
            high,
            reason: err.to_string(),
        }
    }

    pub(super) fn normal(std_dev: f32, err: NormalError) -> Self {
        Self::Normal {
            std_dev,
            reason: err.to_string(),
        }
    }
}

impl Display for DistributionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionErr::Uniform { low, high, reason } => {
                write!(f, "uniform range [{low}, {high}) is unusable: {reason}")
            }
            DistributionErr::Normal { std_dev, reason } => {
                write!(f, "normal with std dev {std_dev} is unusable: {reason}")
            }
        }
    }
}

impl Error for DistributionErr {}
