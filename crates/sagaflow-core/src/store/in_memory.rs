//! In-memory `WorkflowStore`, backed by a single reader-writer lock.
//!
//! Reads and writes deep-copy the stored record so a caller can never
//! mutate state out from under the store through a returned reference.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::types::{
    CompensationRecord, ExecutionFilter, HistoryEvent, WorkflowExecution, WorkflowStatus,
};
use super::workflow_store::{StoreError, WorkflowStore};

struct Entry {
    execution: WorkflowExecution,
    history: Vec<HistoryEvent>,
}

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save_execution(&self, mut execution: WorkflowExecution) -> Result<WorkflowExecution, StoreError> {
        let mut entries = self.entries.write();
        if entries
            .values()
            .any(|e| e.execution.workflow_id == execution.workflow_id && !e.execution.status.is_terminal())
        {
            return Err(StoreError::Conflict(format!(
                "workflow_id {} already has a non-terminal execution",
                execution.workflow_id
            )));
        }
        let now = Utc::now();
        execution.created_at = now;
        execution.updated_at = now;
        entries.insert(
            execution.id,
            Entry {
                execution: execution.clone(),
                history: vec![],
            },
        );
        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        self.entries
            .read()
            .get(&id)
            .map(|e| e.execution.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_execution_by_workflow_id(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowExecution, StoreError> {
        self.entries
            .read()
            .values()
            .filter(|e| e.execution.workflow_id == workflow_id)
            .max_by_key(|e| e.execution.created_at)
            .map(|e| e.execution.clone())
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))
    }

    async fn list_executions(&self, filter: ExecutionFilter) -> Result<Vec<WorkflowExecution>, StoreError> {
        let entries = self.entries.read();
        let mut matching: Vec<WorkflowExecution> = entries
            .values()
            .map(|e| e.execution.clone())
            .filter(|e| {
                filter
                    .workflow_type
                    .as_ref()
                    .map_or(true, |t| &e.workflow_type == t)
                    && filter.status.map_or(true, |s| e.status == s)
                    && filter.started_after.map_or(true, |t| e.started_at >= t)
                    && filter.started_before.map_or(true, |t| e.started_at <= t)
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let start = filter.offset as usize;
        let end = start.saturating_add(filter.limit.max(1) as usize);
        Ok(matching.into_iter().skip(start).take(end - start).collect())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.execution.status = status;
        entry.execution.error = error;
        if status.is_terminal() {
            entry.execution.completed_at = Some(Utc::now());
        }
        entry.execution.updated_at = Utc::now();
        Ok(())
    }

    async fn update_progress(
        &self,
        id: Uuid,
        next_step_index: usize,
        step_id: &str,
        step_output: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.execution.next_step_index = next_step_index;
        entry
            .execution
            .step_outputs
            .insert(step_id.to_string(), step_output);
        entry.execution.updated_at = Utc::now();
        Ok(())
    }

    async fn record_step_output(
        &self,
        id: Uuid,
        step_id: &str,
        step_output: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry
            .execution
            .step_outputs
            .insert(step_id.to_string(), step_output);
        entry.execution.updated_at = Utc::now();
        Ok(())
    }

    async fn update_output(&self, id: Uuid, output: serde_json::Value) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.execution.output = Some(output);
        entry.execution.updated_at = Utc::now();
        Ok(())
    }

    async fn update_compensations(
        &self,
        id: Uuid,
        compensations: Vec<CompensationRecord>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.execution.compensations = compensations;
        entry.execution.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_execution(&self, id: Uuid) -> Result<(), StoreError> {
        self.entries
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn count_by_status(&self, status: WorkflowStatus) -> Result<u64, StoreError> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|e| e.execution.status == status)
            .count() as u64)
    }

    async fn append_history(
        &self,
        id: Uuid,
        event_type: &str,
        detail: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let event_id = entry.history.len() as u64 + 1;
        entry.history.push(HistoryEvent {
            event_id,
            event_type: event_type.to_string(),
            detail,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn load_history(&self, id: Uuid) -> Result<Vec<HistoryEvent>, StoreError> {
        self.entries
            .read()
            .get(&id)
            .map(|e| e.history.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_execution() -> WorkflowExecution {
        WorkflowExecution::new("wf-1", "ai-pipeline", serde_json::json!({}))
    }

    #[tokio::test]
    async fn save_and_get_round_trips() {
        let store = InMemoryWorkflowStore::new();
        let saved = store.save_execution(new_execution()).await.unwrap();
        let fetched = store.get_execution(saved.id).await.unwrap();
        assert_eq!(fetched.workflow_id, "wf-1");
    }

    #[tokio::test]
    async fn duplicate_non_terminal_workflow_id_conflicts() {
        let store = InMemoryWorkflowStore::new();
        store.save_execution(new_execution()).await.unwrap();
        let err = store.save_execution(new_execution()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_status_sets_completed_at_on_terminal() {
        let store = InMemoryWorkflowStore::new();
        let saved = store.save_execution(new_execution()).await.unwrap();
        store
            .update_status(saved.id, WorkflowStatus::Completed, None)
            .await
            .unwrap();
        let fetched = store.get_execution(saved.id).await.unwrap();
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn history_events_are_contiguous() {
        let store = InMemoryWorkflowStore::new();
        let saved = store.save_execution(new_execution()).await.unwrap();
        store
            .append_history(saved.id, "workflow_started", serde_json::json!({}))
            .await
            .unwrap();
        store
            .append_history(saved.id, "activity_completed", serde_json::json!({}))
            .await
            .unwrap();
        let history = store.load_history(saved.id).await.unwrap();
        assert_eq!(history[0].event_id, 1);
        assert_eq!(history[1].event_id, 2);
    }

    #[tokio::test]
    async fn get_missing_execution_is_not_found() {
        let store = InMemoryWorkflowStore::new();
        let err = store.get_execution(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
