//! PostgreSQL-backed `JobStore`.
//!
//! `claim_job` uses a `SELECT ... FOR UPDATE SKIP LOCKED` CAS pattern so
//! two pollers racing on the same row never both win.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::job_store::{JobStore, StoreError};
use super::types::{Job, JobFilter, JobStatus};

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Scheduled => "scheduled",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
        JobStatus::Retrying => "retrying",
    }
}

fn parse_status(s: &str) -> Result<JobStatus, StoreError> {
    Ok(match s {
        "pending" => JobStatus::Pending,
        "scheduled" => JobStatus::Scheduled,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        "retrying" => JobStatus::Retrying,
        other => return Err(StoreError::Validation(format!("unknown status '{other}'"))),
    })
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
    let metadata: serde_json::Value = row.try_get("metadata").unwrap_or(serde_json::json!({}));
    let timeout_ms: i64 = row.try_get("timeout_ms").map_err(|e| StoreError::Transient(e.to_string()))?;

    Ok(Job {
        id: row.try_get("id").map_err(|e| StoreError::Transient(e.to_string()))?,
        task_type: row.try_get("task_type").map_err(|e| StoreError::Transient(e.to_string()))?,
        payload: row.try_get("payload").map_err(|e| StoreError::Transient(e.to_string()))?,
        queue: row.try_get("queue").map_err(|e| StoreError::Transient(e.to_string()))?,
        status: parse_status(row.try_get::<String, _>("status").map_err(|e| StoreError::Transient(e.to_string()))?.as_str())?,
        scheduled_at: row.try_get("scheduled_at").ok(),
        started_at: row.try_get("started_at").ok(),
        completed_at: row.try_get("completed_at").ok(),
        failed_at: row.try_get("failed_at").ok(),
        retry_count: row.try_get::<i32, _>("retry_count").unwrap_or(0) as u32,
        max_retries: row.try_get::<i32, _>("max_retries").unwrap_or(0) as u32,
        timeout: std::time::Duration::from_millis(timeout_ms as u64),
        cron_expression: row.try_get("cron_expression").ok(),
        cron_entry_id: row.try_get("cron_entry_id").ok(),
        error: row.try_get("error").ok(),
        result: row.try_get("result").ok(),
        metadata: serde_json::from_value(metadata).unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(|e| StoreError::Transient(e.to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|e| StoreError::Transient(e.to_string()))?,
    })
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    #[tracing::instrument(skip(self, job))]
    async fn save_job(&self, mut job: Job) -> Result<Job, StoreError> {
        let now = Utc::now();
        job.created_at = now;
        job.updated_at = now;

        sqlx::query(
            r#"
            INSERT INTO scheduler_jobs
                (id, task_type, payload, status, queue, scheduled_at, started_at, completed_at,
                 failed_at, retry_count, max_retries, error, result, cron_expression,
                 cron_entry_id, timeout_ms, created_at, updated_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(job.id)
        .bind(&job.task_type)
        .bind(&job.payload)
        .bind(status_str(job.status))
        .bind(&job.queue)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.failed_at)
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(&job.error)
        .bind(&job.result)
        .bind(&job.cron_expression)
        .bind(&job.cron_entry_id)
        .bind(job.timeout.as_millis() as i64)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(serde_json::to_value(&job.metadata).unwrap_or_default())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        let row = sqlx::query("SELECT * FROM scheduler_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row_to_job(&row)
    }

    #[tracing::instrument(skip(self))]
    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        let statuses: Vec<&'static str> = filter.status.iter().copied().map(status_str).collect();
        let rows = sqlx::query(
            r#"
            SELECT * FROM scheduler_jobs
            WHERE (array_length($1::text[], 1) IS NULL OR status = ANY($1))
              AND (array_length($2::text[], 1) IS NULL OR task_type = ANY($2))
              AND ($3::text IS NULL OR queue = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(&statuses)
        .bind(&filter.task_types)
        .bind(&filter.queue)
        .bind(filter.limit.max(1) as i64)
        .bind(filter.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        rows.iter().map(row_to_job).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn get_pending_jobs(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM scheduler_jobs
            WHERE status IN ('pending', 'scheduled', 'retrying')
              AND (scheduled_at IS NULL OR scheduled_at <= now())
            ORDER BY scheduled_at ASC NULLS FIRST
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        rows.iter().map(row_to_job).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn get_recurring_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query("SELECT * FROM scheduler_jobs WHERE cron_expression IS NOT NULL")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        rows.iter().map(row_to_job).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn claim_job(&self, id: Uuid) -> Result<Job, StoreError> {
        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id FROM scheduler_jobs
                WHERE id = $1 AND status IN ('pending', 'scheduled', 'retrying')
                FOR UPDATE SKIP LOCKED
            )
            UPDATE scheduler_jobs
            SET status = 'running',
                started_at = COALESCE(started_at, now()),
                updated_at = now()
            FROM claimable
            WHERE scheduler_jobs.id = claimable.id
            RETURNING scheduler_jobs.*
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
        .ok_or_else(|| StoreError::Conflict(id.to_string()))?;

        row_to_job(&row)
    }

    #[tracing::instrument(skip(self))]
    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let completed_at = (status == JobStatus::Completed).then(Utc::now);
        let failed_at = (status == JobStatus::Failed).then(Utc::now);

        let result = sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET status = $2, error = $3,
                completed_at = COALESCE($4, completed_at),
                failed_at = COALESCE($5, failed_at),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status_str(status))
        .bind(error)
        .bind(completed_at)
        .bind(failed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, result))]
    async fn set_job_result(&self, id: Uuid, result: serde_json::Value) -> Result<(), StoreError> {
        let rows = sqlx::query("UPDATE scheduler_jobs SET result = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(result)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        if rows.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn increment_retry_count(&self, id: Uuid) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "UPDATE scheduler_jobs SET retry_count = retry_count + 1, updated_at = now() WHERE id = $1 RETURNING retry_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(row.try_get::<i32, _>("retry_count").map_err(|e| StoreError::Transient(e.to_string()))? as u32)
    }

    #[tracing::instrument(skip(self))]
    async fn reschedule(&self, id: Uuid, scheduled_at: DateTime<Utc>) -> Result<(), StoreError> {
        let rows = sqlx::query(
            "UPDATE scheduler_jobs SET status = 'retrying', scheduled_at = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;
        if rows.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_job(&self, id: Uuid) -> Result<(), StoreError> {
        let rows = sqlx::query("DELETE FROM scheduler_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        if rows.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM scheduler_jobs WHERE status = $1")
            .bind(status_str(status))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(row.try_get::<i64, _>("count").map_err(|e| StoreError::Transient(e.to_string()))? as u64)
    }
}
