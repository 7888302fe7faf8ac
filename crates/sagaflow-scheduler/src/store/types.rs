//! Data types persisted by a `JobStore`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Statuses a job must be in for a poller to claim it.
    pub fn claimable() -> [JobStatus; 3] {
        [JobStatus::Pending, JobStatus::Scheduled, JobStatus::Retrying]
    }
}

/// One durable record of a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub queue: String,
    pub status: JobStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub cron_expression: Option<String>,
    pub cron_entry_id: Option<String>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub metadata: std::collections::HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload,
            queue: "default".to_string(),
            status: JobStatus::Pending,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            retry_count: 0,
            max_retries: 3,
            timeout: Duration::from_secs(300),
            cron_expression: None,
            cron_entry_id: None,
            error: None,
            result: None,
            metadata: std::collections::HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self.status = JobStatus::Scheduled;
        self
    }

    pub fn with_cron(mut self, cron_expression: impl Into<String>) -> Self {
        self.cron_expression = Some(cron_expression.into());
        self.cron_entry_id = Some(Uuid::now_v7().to_string());
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    CreatedAt,
    UpdatedAt,
    ScheduledAt,
    Status,
    TaskType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Vec<JobStatus>,
    pub task_types: Vec<String>,
    pub queue: Option<String>,
    pub scheduled_before: Option<DateTime<Utc>>,
    pub scheduled_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub with_cron: Option<bool>,
    pub limit: u32,
    pub offset: u32,
    pub order_by: Option<OrderBy>,
    pub order_direction: Option<OrderDirection>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.clamp(1, 1000);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status.push(status);
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_types.push(task_type.into());
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
