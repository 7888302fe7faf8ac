//! The `WorkflowStore` contract.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorKind;

use super::types::{CompensationRecord, ExecutionFilter, HistoryEvent, WorkflowExecution, WorkflowStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow execution not found: {0}")]
    NotFound(String),

    #[error("conflicting update for workflow execution {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Transient(String),

    #[error("invalid execution record: {0}")]
    Validation(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::Transient(_) => ErrorKind::Transient,
            StoreError::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// Durable storage for `WorkflowExecution` records.
///
/// Implementations must be linearizable per `id`: two concurrent
/// `UpdateStatus` calls against the same execution must not both succeed in
/// transitioning out of the same prior status.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution, StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, StoreError>;

    async fn get_execution_by_workflow_id(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowExecution, StoreError>;

    async fn list_executions(
        &self,
        filter: ExecutionFilter,
    ) -> Result<Vec<WorkflowExecution>, StoreError>;

    async fn update_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Persist the output of a just-completed step (or the workflow's
    /// final output) together with the next step index to resume at.
    async fn update_progress(
        &self,
        id: Uuid,
        next_step_index: usize,
        step_id: &str,
        step_output: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Persist one branch of a parallel block as it completes, without
    /// advancing `next_step_index`. A restart mid-block resumes by treating
    /// any `step_id` already present in `step_outputs` as done.
    async fn record_step_output(
        &self,
        id: Uuid,
        step_id: &str,
        step_output: serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn update_output(&self, id: Uuid, output: serde_json::Value) -> Result<(), StoreError>;

    async fn update_compensations(
        &self,
        id: Uuid,
        compensations: Vec<CompensationRecord>,
    ) -> Result<(), StoreError>;

    async fn delete_execution(&self, id: Uuid) -> Result<(), StoreError>;

    async fn count_by_status(&self, status: WorkflowStatus) -> Result<u64, StoreError>;

    async fn append_history(&self, id: Uuid, event_type: &str, detail: serde_json::Value) -> Result<(), StoreError>;

    async fn load_history(&self, id: Uuid) -> Result<Vec<HistoryEvent>, StoreError>;
}
