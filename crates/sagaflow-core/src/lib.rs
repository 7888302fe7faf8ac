//! Durable workflow execution core.
//!
//! ```text
//!  WorkflowEngine ──▶ WorkflowStore (InMemory | Postgres)
//!        │
//!        ├──▶ ActivityRegistry ──▶ registered handlers (opaque payloads)
//!        │
//!        └──▶ CompensationManager ──▶ ActivityRegistry (rollback activities)
//! ```
//!
//! A [`WorkflowDefinition`](engine::WorkflowDefinition) is data: an ordered
//! list of activity calls, parallel blocks, and validation steps. The engine
//! interprets it generically, persisting the current step index and each
//! completed step's output after every activity so a crashed process can
//! resume a workflow instance without replaying its whole history.

pub mod activity;
pub mod compensation;
pub mod config;
pub mod engine;
pub mod error;
pub mod reliability;
pub mod store;

pub mod prelude {
    pub use crate::activity::{
        Activity, ActivityContext, ActivityError, ActivityRegistry, CancellationHandle,
    };
    pub use crate::compensation::{CompensationManager, CompensationOutcome, CompensationStep};
    pub use crate::engine::{
        ActivityCall, ParallelBlock, Step, WorkflowDefinition, WorkflowEngine, WorkflowOptions,
    };
    pub use crate::error::CoreError;
    pub use crate::reliability::RetryPolicy;
    pub use crate::store::{
        ExecutionFilter, HistoryEvent, InMemoryWorkflowStore, WorkflowExecution, WorkflowStatus,
        WorkflowStore,
    };
}

pub use activity::{Activity, ActivityContext, ActivityError, ActivityRegistry};
pub use compensation::CompensationManager;
pub use config::EngineConfig;
pub use engine::{WorkflowDefinition, WorkflowEngine};
pub use error::CoreError;
pub use reliability::RetryPolicy;
pub use store::{WorkflowExecution, WorkflowStatus, WorkflowStore};
