// Error types module

use thiserror::Error;

use crate::client::RemoteServiceError;
use crate::config::ConfigError;
use crate::model::FailureKind;
use crate::policy::PolicyError;
use crate::signing::SigningError;
use crate::storage::StorageError;
use crate::store::StoreError;
use crate::worker::WorkerError;

/// Errors returned synchronously by the pipeline facade
///
/// Apart from `Worker`, anything returned here happened before a task was
/// accepted, so no record exists for it. A `Worker` error leaves the record
/// failed as cancelled.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Remote(#[from] RemoteServiceError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Failure of a continuation after its task was accepted
///
/// Never returned to callers; converted into the record's failure kind and
/// error message.
#[derive(Debug, Error)]
pub enum BackgroundProcessingError {
    #[error("remote task failed: {0}")]
    RemoteFailed(String),

    #[error("remote service error: {0}")]
    Remote(#[from] RemoteServiceError),

    #[error("remote task finished without a usable result")]
    MissingResult,

    #[error("file storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("task was cancelled")]
    Cancelled,

    #[error("remote task did not settle after {attempts} status polls")]
    PollExhausted { attempts: u32 },

    #[error("continuation panicked: {0}")]
    Panicked(String),
}

impl BackgroundProcessingError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BackgroundProcessingError::RemoteFailed(_) => FailureKind::Remote,
            BackgroundProcessingError::Cancelled => FailureKind::Cancelled,
            BackgroundProcessingError::PollExhausted { .. } => FailureKind::TimedOut,
            _ => FailureKind::Processing,
        }
    }
}
