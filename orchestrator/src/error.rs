use std::{error::Error, fmt, io, path::PathBuf};

use machine_learning::arch::BuilderError;
use parameter_server::StoreErr;
use worker::WorkerErr;

/// The orchestrator's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can end a training run.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Bad or missing settings, caught before training starts.
    InvalidConfiguration(String),
    /// The model builder's own error, untouched.
    ModelBuilder(BuilderError),
    /// Fewer working devices than configured.
    DeviceUnavailable(String),
    CheckpointWrite {
        path: PathBuf,
        source: io::Error,
    },
    CheckpointRead {
        path: PathBuf,
        reason: String,
    },
    Dataset(String),
    Worker(WorkerErr),
    Store(StoreErr),
    Serialization(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::ModelBuilder(e) => write!(f, "{e}"),
            Self::DeviceUnavailable(msg) => write!(f, "device unavailable: {msg}"),
            Self::CheckpointWrite { path, source } => {
                write!(f, "couldn't write checkpoint {}: {source}", path.display())
            }
            Self::CheckpointRead { path, reason } => {
                write!(f, "couldn't read checkpoint {}: {reason}", path.display())
            }
            Self::Dataset(msg) => write!(f, "dataset error: {msg}"),
            Self::Worker(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "parameter store error: {e}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ModelBuilder(e) => Some(e.as_ref()),
            Self::CheckpointWrite { source, .. } => Some(source),
            Self::Worker(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Serialization(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WorkerErr> for OrchestratorError {
    fn from(e: WorkerErr) -> Self {
        match e {
            WorkerErr::InvalidConfiguration(msg) => Self::InvalidConfiguration(msg),
            WorkerErr::ModelBuilder(e) => Self::ModelBuilder(e),
            WorkerErr::DeviceUnavailable(msg) => Self::DeviceUnavailable(msg),
            WorkerErr::Dataset(msg) => Self::Dataset(msg),
            e => Self::Worker(e),
        }
    }
}

impl From<StoreErr> for OrchestratorError {
    fn from(e: StoreErr) -> Self {
        Self::Store(e)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<OrchestratorError> for io::Error {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Io(e) => e,
            OrchestratorError::InvalidConfiguration(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            e => io::Error::other(e.to_string()),
        }
    }
}
