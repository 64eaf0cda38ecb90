use machine_learning::arch::ParamSpec;
use serde::{Deserialize, Serialize};

use super::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer};

/// The optimizers a training run can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerKind {
    GradientDescent {
        lr: f32,
    },
    Momentum {
        lr: f32,
        mu: f32,
    },
    Adam {
        lr: f32,
        #[serde(default = "default_b1")]
        b1: f32,
        #[serde(default = "default_b2")]
        b2: f32,
        #[serde(default = "default_eps")]
        eps: f32,
    },
}

fn default_b1() -> f32 {
    0.9
}

fn default_b2() -> f32 {
    0.999
}

fn default_eps() -> f32 {
    1e-8
}

impl Default for OptimizerKind {
    fn default() -> Self {
        Self::Adam {
            lr: 1e-3,
            b1: default_b1(),
            b2: default_b2(),
            eps: default_eps(),
        }
    }
}

impl OptimizerKind {
    /// Builds the optimizer this kind names, with its state sized for `specs`.
    pub fn build(self, specs: &[ParamSpec]) -> Box<dyn Optimizer> {
        match self {
            Self::GradientDescent { lr } => Box::new(GradientDescent::new(lr)),
            Self::Momentum { lr, mu } => Box::new(GradientDescentWithMomentum::new(specs, lr, mu)),
            Self::Adam { lr, b1, b2, eps } => Box::new(Adam::new(specs, lr, b1, b2, eps)),
        }
    }

    /// Checks the hyperparameters.
    ///
    /// # Returns
    /// A description of the first invalid hyperparameter, if any.
    pub fn check(&self) -> Option<&'static str> {
        let positive = |x: f32| x.is_finite() && x > 0.;
        let unit = |x: f32| (0.0..1.0).contains(&x);

        match *self {
            Self::GradientDescent { lr } | Self::Momentum { lr, .. } | Self::Adam { lr, .. }
                if !positive(lr) =>
            {
                Some("the learning rate must be finite and positive")
            }
            Self::Momentum { mu, .. } if !unit(mu) => Some("the momentum must be in [0, 1)"),
            Self::Adam { b1, b2, .. } if !unit(b1) || !unit(b2) => {
                Some("the adam betas must be in [0, 1)")
            }
            Self::Adam { eps, .. } if !positive(eps) => {
                Some("the adam epsilon must be finite and positive")
            }
            _ => None,
        }
    }
}
