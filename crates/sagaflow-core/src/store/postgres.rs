//! PostgreSQL-backed `WorkflowStore`.
//!
//! Table layout: `workflow_executions` plus a companion
//! `workflow_history_events` table keyed by `(workflow_id, event_id)`.
//! Migrations are the caller's responsibility; this store only issues DML
//! against an existing schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::types::{
    CompensationRecord, ExecutionFilter, HistoryEvent, WorkflowExecution, WorkflowStatus,
};
use super::workflow_store::{StoreError, WorkflowStore};

pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Pending => "pending",
        WorkflowStatus::Running => "running",
        WorkflowStatus::Completed => "completed",
        WorkflowStatus::Failed => "failed",
        WorkflowStatus::Canceled => "canceled",
    }
}

fn parse_status(s: &str) -> Result<WorkflowStatus, StoreError> {
    match s {
        "pending" => Ok(WorkflowStatus::Pending),
        "running" => Ok(WorkflowStatus::Running),
        "completed" => Ok(WorkflowStatus::Completed),
        "failed" => Ok(WorkflowStatus::Failed),
        "canceled" => Ok(WorkflowStatus::Canceled),
        other => Err(StoreError::Validation(format!("unknown status '{other}'"))),
    }
}

fn row_to_execution(row: &sqlx::postgres::PgRow) -> Result<WorkflowExecution, StoreError> {
    let compensations: serde_json::Value = row.try_get("compensations").unwrap_or(serde_json::json!([]));
    let metadata: serde_json::Value = row.try_get("metadata").unwrap_or(serde_json::json!({}));
    let step_outputs: serde_json::Value = row.try_get("step_outputs").unwrap_or(serde_json::json!({}));

    Ok(WorkflowExecution {
        id: row.try_get("id").map_err(|e| StoreError::Transient(e.to_string()))?,
        workflow_id: row.try_get("workflow_id").map_err(|e| StoreError::Transient(e.to_string()))?,
        workflow_type: row.try_get("workflow_type").map_err(|e| StoreError::Transient(e.to_string()))?,
        run_id: row.try_get("run_id").ok(),
        status: parse_status(row.try_get::<String, _>("status").map_err(|e| StoreError::Transient(e.to_string()))?.as_str())?,
        input: row.try_get("input").map_err(|e| StoreError::Transient(e.to_string()))?,
        output: row.try_get("output").ok(),
        error: row.try_get("error").ok(),
        started_at: row.try_get::<DateTime<Utc>, _>("started_at").map_err(|e| StoreError::Transient(e.to_string()))?,
        completed_at: row.try_get("completed_at").ok(),
        compensations: serde_json::from_value(compensations).unwrap_or_default(),
        metadata: serde_json::from_value(metadata).unwrap_or_default(),
        next_step_index: row.try_get::<i64, _>("next_step_index").unwrap_or(0) as usize,
        step_outputs: serde_json::from_value(step_outputs).unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(|e| StoreError::Transient(e.to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|e| StoreError::Transient(e.to_string()))?,
    })
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[tracing::instrument(skip(self, execution))]
    async fn save_execution(&self, mut execution: WorkflowExecution) -> Result<WorkflowExecution, StoreError> {
        let now = Utc::now();
        execution.created_at = now;
        execution.updated_at = now;

        let result = sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, workflow_type, run_id, status, input, output, error,
                 started_at, completed_at, compensations, metadata, next_step_index,
                 step_outputs, created_at, updated_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16
            WHERE NOT EXISTS (
                SELECT 1 FROM workflow_executions
                WHERE workflow_id = $2 AND status NOT IN ('completed', 'failed', 'canceled')
            )
            "#,
        )
        .bind(execution.id)
        .bind(&execution.workflow_id)
        .bind(&execution.workflow_type)
        .bind(&execution.run_id)
        .bind(status_str(execution.status))
        .bind(&execution.input)
        .bind(&execution.output)
        .bind(&execution.error)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(serde_json::to_value(&execution.compensations).unwrap_or_default())
        .bind(serde_json::to_value(&execution.metadata).unwrap_or_default())
        .bind(execution.next_step_index as i64)
        .bind(serde_json::to_value(&execution.step_outputs).unwrap_or_default())
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "workflow_id {} already has a non-terminal execution",
                execution.workflow_id
            )));
        }
        Ok(execution)
    }

    #[tracing::instrument(skip(self))]
    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row_to_execution(&row)
    }

    #[tracing::instrument(skip(self))]
    async fn get_execution_by_workflow_id(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowExecution, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_executions WHERE workflow_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
        .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        row_to_execution(&row)
    }

    #[tracing::instrument(skip(self))]
    async fn list_executions(&self, filter: ExecutionFilter) -> Result<Vec<WorkflowExecution>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_executions
            WHERE ($1::text IS NULL OR workflow_type = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR started_at >= $3)
              AND ($4::timestamptz IS NULL OR started_at <= $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(&filter.workflow_type)
        .bind(filter.status.map(status_str))
        .bind(filter.started_after)
        .bind(filter.started_before)
        .bind(filter.limit.max(1) as i64)
        .bind(filter.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        rows.iter().map(row_to_execution).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let completed_at = status.is_terminal().then(Utc::now);
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2, error = $3,
                completed_at = COALESCE($4, completed_at),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status_str(status))
        .bind(error)
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, step_output))]
    async fn update_progress(
        &self,
        id: Uuid,
        next_step_index: usize,
        step_id: &str,
        step_output: serde_json::Value,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET next_step_index = $2,
                step_outputs = jsonb_set(COALESCE(step_outputs, '{}'::jsonb), ARRAY[$3], $4, true),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_step_index as i64)
        .bind(step_id)
        .bind(step_output)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, step_output))]
    async fn record_step_output(
        &self,
        id: Uuid,
        step_id: &str,
        step_output: serde_json::Value,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET step_outputs = jsonb_set(COALESCE(step_outputs, '{}'::jsonb), ARRAY[$2], $3, true),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(step_id)
        .bind(step_output)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, output))]
    async fn update_output(&self, id: Uuid, output: serde_json::Value) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE workflow_executions SET output = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(output)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, compensations))]
    async fn update_compensations(
        &self,
        id: Uuid,
        compensations: Vec<CompensationRecord>,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&compensations).unwrap_or_default();
        let result = sqlx::query(
            "UPDATE workflow_executions SET compensations = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_execution(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM workflow_executions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn count_by_status(&self, status: WorkflowStatus) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM workflow_executions WHERE status = $1")
            .bind(status_str(status))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        let count: i64 = row.try_get("count").map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(count as u64)
    }

    #[tracing::instrument(skip(self, detail))]
    async fn append_history(
        &self,
        id: Uuid,
        event_type: &str,
        detail: serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_history_events (workflow_id, event_id, event_type, payload, recorded_at)
            SELECT $1,
                   COALESCE((SELECT MAX(event_id) FROM workflow_history_events WHERE workflow_id = $1), 0) + 1,
                   $2, $3, now()
            "#,
        )
        .bind(id)
        .bind(event_type)
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn load_history(&self, id: Uuid) -> Result<Vec<HistoryEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT event_id, event_type, payload, recorded_at FROM workflow_history_events WHERE workflow_id = $1 ORDER BY event_id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(HistoryEvent {
                    event_id: row.try_get::<i64, _>("event_id").map_err(|e| StoreError::Transient(e.to_string()))? as u64,
                    event_type: row.try_get("event_type").map_err(|e| StoreError::Transient(e.to_string()))?,
                    detail: row.try_get("payload").map_err(|e| StoreError::Transient(e.to_string()))?,
                    recorded_at: row.try_get("recorded_at").map_err(|e| StoreError::Transient(e.to_string()))?,
                })
            })
            .collect()
    }
}
