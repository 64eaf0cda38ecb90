use std::{
    error::Error,
    fmt::{self, Display},
};

use machine_learning::MlErr;

use crate::initialization::DistributionErr;

/// The specific result type for the parameter server crate.
pub type Result<T> = std::result::Result<T, StoreErr>;

/// Error returned whenever parameters, gradients, snapshots or optimizer state
/// don't fit together.
#[derive(Debug)]
pub enum StoreErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        param: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    MissingParam(String),
    IncompatibleState(&'static str),
    Init {
        param: String,
        source: DistributionErr,
    },
    Ml(MlErr),
}

impl Display for StoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "{what}: got {got} entries but expected {expected}"),
            StoreErr::ShapeMismatch {
                param,
                got,
                expected,
            } => write!(
                f,
                "parameter {param}: got shape {got:?} but expected {expected:?}"
            ),
            StoreErr::MissingParam(param) => write!(f, "parameter {param} is missing"),
            StoreErr::IncompatibleState(reason) => {
                write!(f, "incompatible optimizer state: {reason}")
            }
            StoreErr::Init { param, source } => {
                write!(f, "failed to initialize parameter {param}: {source}")
            }
            StoreErr::Ml(e) => write!(f, "{e}"),
        }
    }
}

impl Error for StoreErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreErr::Init { source, .. } => Some(source),
            StoreErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for StoreErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}
