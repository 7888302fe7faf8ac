//! The `JobStore` contract.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use sagaflow_core::error::ErrorKind;

use super::types::{Job, JobFilter, JobStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("conflicting claim for job {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Transient(String),

    #[error("invalid job record: {0}")]
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

/// Durable storage for `Job` records.
///
/// `claim_job` must be linearizable: two concurrent claims of the same job
/// never both succeed, implemented by reference stores as a CAS on
/// `status`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save_job(&self, job: Job) -> Result<Job, StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError>;

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Jobs eligible for a poller: status in `{pending, scheduled,
    /// retrying}` with `scheduled_at <= now OR scheduled_at IS NULL`,
    /// ordered by `scheduled_at ASC`.
    async fn get_pending_jobs(&self, limit: u32) -> Result<Vec<Job>, StoreError>;

    async fn get_recurring_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Atomically transition a claimable job to `running`. Returns
    /// `Conflict` if another worker already claimed it.
    async fn claim_job(&self, id: Uuid) -> Result<Job, StoreError>;

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    async fn set_job_result(&self, id: Uuid, result: serde_json::Value) -> Result<(), StoreError>;

    async fn increment_retry_count(&self, id: Uuid) -> Result<u32, StoreError>;

    async fn reschedule(&self, id: Uuid, scheduled_at: chrono::DateTime<chrono::Utc>) -> Result<(), StoreError>;

    async fn delete_job(&self, id: Uuid) -> Result<(), StoreError>;

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError>;
}
