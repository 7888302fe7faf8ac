//! In-memory `JobStore`, backed by a single reader-writer lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::job_store::{JobStore, StoreError};
use super::types::{Job, JobFilter, JobStatus};

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save_job(&self, mut job: Job) -> Result<Job, StoreError> {
        let now = Utc::now();
        job.created_at = now;
        job.updated_at = now;
        self.jobs.write().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read();
        let mut matching: Vec<Job> = jobs
            .values()
            .cloned()
            .filter(|j| {
                (filter.status.is_empty() || filter.status.contains(&j.status))
                    && (filter.task_types.is_empty() || filter.task_types.contains(&j.task_type))
                    && filter.queue.as_ref().map_or(true, |q| &j.queue == q)
                    && filter.scheduled_before.map_or(true, |t| j.scheduled_at.map_or(true, |s| s <= t))
                    && filter.scheduled_after.map_or(true, |t| j.scheduled_at.map_or(true, |s| s >= t))
                    && filter.created_before.map_or(true, |t| j.created_at <= t)
                    && filter.created_after.map_or(true, |t| j.created_at >= t)
                    && filter.with_cron.map_or(true, |wc| j.is_recurring() == wc)
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let start = filter.offset as usize;
        let end = start.saturating_add(filter.limit.max(1) as usize);
        Ok(matching.into_iter().skip(start).take(end - start).collect())
    }

    async fn get_pending_jobs(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let now = Utc::now();
        let jobs = self.jobs.read();
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| {
                JobStatus::claimable().contains(&j.status)
                    && j.scheduled_at.map_or(true, |s| s <= now)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|j| j.scheduled_at.unwrap_or(j.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn get_recurring_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.jobs.read().values().filter(|j| j.is_recurring()).cloned().collect())
    }

    async fn claim_job(&self, id: Uuid) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !JobStatus::claimable().contains(&job.status) {
            return Err(StoreError::Conflict(id.to_string()));
        }
        job.status = JobStatus::Running;
        if job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.status = status;
        job.error = error;
        let now = Utc::now();
        match status {
            JobStatus::Running if job.started_at.is_none() => job.started_at = Some(now),
            JobStatus::Completed => job.completed_at = Some(now),
            JobStatus::Failed => job.failed_at = Some(now),
            _ => {}
        }
        job.updated_at = now;
        Ok(())
    }

    async fn set_job_result(&self, id: Uuid, result: serde_json::Value) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.result = Some(result);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_retry_count(&self, id: Uuid) -> Result<u32, StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.retry_count += 1;
        job.updated_at = Utc::now();
        Ok(job.retry_count)
    }

    async fn reschedule(&self, id: Uuid, scheduled_at: chrono::DateTime<chrono::Utc>) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.scheduled_at = Some(scheduled_at);
        job.status = JobStatus::Retrying;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_job(&self, id: Uuid) -> Result<(), StoreError> {
        self.jobs
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        Ok(self.jobs.read().values().filter(|j| j.status == status).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_get_round_trips() {
        let store = InMemoryJobStore::new();
        let saved = store.save_job(Job::new("email", serde_json::json!({}))).await.unwrap();
        let fetched = store.get_job(saved.id).await.unwrap();
        assert_eq!(fetched.task_type, "email");
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryJobStore::new();
        let saved = store.save_job(Job::new("email", serde_json::json!({}))).await.unwrap();
        let claimed = store.claim_job(saved.id).await.unwrap();
        assert_eq!(claimed.status, JobStatus::Running);

        let err = store.claim_job(saved.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn pending_jobs_respect_scheduled_at() {
        let store = InMemoryJobStore::new();
        let future = Utc::now() + chrono::Duration::hours(1);
        store
            .save_job(Job::new("email", serde_json::json!({})).with_scheduled_at(future))
            .await
            .unwrap();
        let ready = store.save_job(Job::new("email", serde_json::json!({}))).await.unwrap();

        let pending = store.get_pending_jobs(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ready.id);
    }

    #[tokio::test]
    async fn retry_count_is_monotonic() {
        let store = InMemoryJobStore::new();
        let saved = store.save_job(Job::new("email", serde_json::json!({}))).await.unwrap();
        assert_eq!(store.increment_retry_count(saved.id).await.unwrap(), 1);
        assert_eq!(store.increment_retry_count(saved.id).await.unwrap(), 2);
    }
}
