//! Crate-level error type for the scheduler.

use thiserror::Error;

use sagaflow_core::error::ErrorKind;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no activity handler registered for task type: {0}")]
    HandlerNotFound(String),

    #[error("invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("graceful shutdown timed out with tasks still in flight")]
    ShutdownTimeout,
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Store(e) => e.kind(),
            SchedulerError::HandlerNotFound(_) => ErrorKind::Validation,
            SchedulerError::InvalidCron(_, _) => ErrorKind::Validation,
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => ErrorKind::Conflict,
            SchedulerError::ShutdownTimeout => ErrorKind::Transient,
        }
    }
}
