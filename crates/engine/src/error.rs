//! Engine error types.

use chunkflow_transfer::RejectReason;

use crate::session::SessionStatus;
use crate::store::StoreError;

/// Errors returned by [`UploadEngine`](crate::UploadEngine) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation rejected: {0}")]
    Validation(RejectReason),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {id} is {status:?}; operation not allowed")]
    InvalidState { id: String, status: SessionStatus },

    #[error("no file data attached for session {0}")]
    NoSource(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
