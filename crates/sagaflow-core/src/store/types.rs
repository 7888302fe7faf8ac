//! Data types persisted by a `WorkflowStore`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationRecordStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub name: String,
    pub status: CompensationRecordStatus,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// One durable record of a workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_type: String,
    pub run_id: Option<String>,
    pub status: WorkflowStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub compensations: Vec<CompensationRecord>,
    pub metadata: std::collections::HashMap<String, String>,
    /// Index of the next step the engine has not yet executed, persisted
    /// so a restart resumes here instead of re-running completed steps.
    pub next_step_index: usize,
    /// Outputs of steps already completed, keyed by step id.
    pub step_outputs: std::collections::HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_type: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_id: workflow_id.into(),
            workflow_type: workflow_type.into(),
            run_id: None,
            status: WorkflowStatus::Pending,
            input,
            output: None,
            error: None,
            started_at: now,
            completed_at: None,
            compensations: vec![],
            metadata: std::collections::HashMap::new(),
            next_step_index: 0,
            step_outputs: std::collections::HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// An append-only progress record for `GetHistory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: u64,
    pub event_type: String,
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_type: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl ExecutionFilter {
    pub fn new() -> Self {
        Self {
            limit: 20,
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.clamp(1, 100);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow_type.into());
        self
    }
}
