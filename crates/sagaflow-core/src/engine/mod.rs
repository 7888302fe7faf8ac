//! The step-list workflow engine.

mod definition;
mod error;
mod workflow_engine;

pub use definition::{ActivityCall, ActivityOptions, ParallelBlock, Step, WorkflowDefinition, WorkflowOptions};
pub use error::EngineError;
pub use workflow_engine::WorkflowEngine;
