use drover_core::CoreError;
use drover_model::ModelError;
use drover_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ModelError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<StoreError> for ControlError {
    fn from(e: StoreError) -> Self {
        ControlError::Core(e.into())
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(e: serde_json::Error) -> Self {
        ControlError::Core(e.into())
    }
}
