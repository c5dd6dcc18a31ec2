use drover_model::ModelError;
use drover_store::StoreError;
use thiserror::Error;

/// Engine-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Mutex or leadership contention. Expected; never alerted on.
    #[error("{0} is held by another owner")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    /// A held lease ran out or its keepalive stream closed.
    #[error("lease on {0} lost")]
    LeaseLost(String),
    #[error("task aborted: {0}")]
    Aborted(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("transport: {0}")]
    Transport(#[from] StoreError),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Invalid(#[from] ModelError),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

/// Error carried by an execution result and rendered into the log record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The execution mutex was held by another worker.
    #[error("execution lock not acquired")]
    LockBusy,
    #[error("execution timed out")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("non-zero exit code: {code}")]
    NonZeroExit { code: i32 },
    #[error("killed by signal")]
    KilledBySignal,
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("store: {0}")]
    Store(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<StoreError> for ExecError {
    fn from(e: StoreError) -> Self {
        ExecError::Store(e.to_string())
    }
}
