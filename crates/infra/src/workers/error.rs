//! Worker lifecycle errors

use std::time::Duration;

use mailsync_domain::MailSyncError;
use thiserror::Error;

use crate::errors::InfraError;

/// Failures starting or stopping a background worker
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker already running")]
    AlreadyRunning,

    #[error("worker not running")]
    NotRunning,

    /// The task did not finish within the join timeout
    #[error("worker did not stop within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("worker task failed: {0}")]
    TaskJoinFailed(String),
}

impl From<WorkerError> for InfraError {
    fn from(err: WorkerError) -> Self {
        let mapped = match err {
            WorkerError::AlreadyRunning | WorkerError::NotRunning => {
                MailSyncError::Validation(err.to_string())
            }
            WorkerError::Timeout { .. } => MailSyncError::Timeout(err.to_string()),
            WorkerError::TaskJoinFailed(_) => MailSyncError::Internal(err.to_string()),
        };
        Self(mapped)
    }
}

impl From<WorkerError> for MailSyncError {
    fn from(err: WorkerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Result alias for worker lifecycle calls
pub type WorkerResult<T> = Result<T, WorkerError>;
