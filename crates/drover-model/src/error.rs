use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid task key: {0} (expected <type>/<owner>/<name>)")]
    InvalidKey(String),
    #[error("invalid task name: {0} (expected 1-16 of [A-Za-z0-9_])")]
    InvalidName(String),
    #[error("unsupported task type: {0}")]
    InvalidType(String),
}
