use std::{error::Error, fmt, io};

use machine_learning::{MlErr, arch::BuilderError};
use parameter_server::StoreErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Failures of the per-device side of a training step.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    InvalidConfiguration(String),
    DeviceUnavailable(String),
    /// The model builder's own error, untouched.
    ModelBuilder(BuilderError),
    Dataset(String),
    Store(StoreErr),
    Ml(MlErr),
    Serialization(serde_json::Error),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::InvalidConfiguration(reason) => {
                write!(f, "invalid configuration: {reason}")
            }
            WorkerErr::DeviceUnavailable(reason) => write!(f, "device unavailable: {reason}"),
            WorkerErr::ModelBuilder(e) => write!(f, "{e}"),
            WorkerErr::Dataset(reason) => write!(f, "dataset error: {reason}"),
            WorkerErr::Store(e) => write!(f, "parameter store error: {e}"),
            WorkerErr::Ml(e) => write!(f, "{e}"),
            WorkerErr::Serialization(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::ModelBuilder(e) => Some(e.as_ref()),
            WorkerErr::Store(e) => Some(e),
            WorkerErr::Ml(e) => Some(e),
            WorkerErr::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<StoreErr> for WorkerErr {
    fn from(value: StoreErr) -> Self {
        Self::Store(value)
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<serde_json::Error> for WorkerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
