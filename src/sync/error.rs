use thiserror::Error;

use crate::api::ApiError;

/// Errors that stop a sync pass.
///
/// Failed remote writes never show up here: they are queued as pending
/// writes instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Local store failure
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    /// Transient errors end the current step; the next step of a pass still runs.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Api(e) => e.is_transient(),
            SyncError::Storage(_) => false,
        }
    }
}
