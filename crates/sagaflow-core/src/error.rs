//! Crate-level error taxonomy.
//!
//! Every layer (registry, store, engine, compensation manager) defines its
//! own `thiserror` enum; this type folds them into one error a caller
//! assembling the pieces can match on without reaching into each module.

use thiserror::Error;

use crate::activity::{ActivityError, RegistryError};
use crate::engine::EngineError;
use crate::store::StoreError;

/// The kind of failure, independent of which layer raised it.
///
/// The HTTP boundary (outside this crate) maps `Validation` to 400,
/// `NotFound` to 404, and treats `Conflict`/`Transient` as retriable
/// internally before surfacing a 5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Transient,
    Terminal,
    Fault,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Registry(e) => e.kind(),
            CoreError::Store(e) => e.kind(),
            CoreError::Engine(e) => e.kind(),
            CoreError::Activity(e) => {
                if e.retryable {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Terminal
                }
            }
            CoreError::Other(_) => ErrorKind::Fault,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Conflict)
    }
}
