use thiserror::Error;

use crate::{LeaseId, Revision};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("coordination store unavailable")]
    Unavailable,
    #[error("lease {0:#x} not found")]
    LeaseNotFound(LeaseId),
    #[error("stream closed")]
    Closed,
    /// The requested start revision is no longer kept in history.
    #[error("revision {requested} compacted (history starts after {compacted})")]
    Compacted {
        requested: Revision,
        compacted: Revision,
    },
}
