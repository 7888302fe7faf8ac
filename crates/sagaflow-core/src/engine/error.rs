use thiserror::Error;

use crate::error::ErrorKind;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workflow step failed: {0}")]
    StepFailed(String),

    #[error("workflow already terminal")]
    AlreadyTerminal,

    #[error("no activity registered for type '{0}'")]
    UnknownActivity(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Store(e) => e.kind(),
            EngineError::StepFailed(_) => ErrorKind::Terminal,
            EngineError::AlreadyTerminal => ErrorKind::Conflict,
            EngineError::UnknownActivity(_) => ErrorKind::Validation,
        }
    }
}
