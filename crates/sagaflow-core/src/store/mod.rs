//! The `WorkflowStore` contract and its reference implementations.

mod in_memory;
mod postgres;
mod types;
mod workflow_store;

pub use in_memory::InMemoryWorkflowStore;
pub use postgres::PostgresWorkflowStore;
pub use types::{
    CompensationRecord, CompensationRecordStatus, ExecutionFilter, HistoryEvent,
    WorkflowExecution, WorkflowStatus,
};
pub use workflow_store::{StoreError, WorkflowStore};
