//! `JobScheduler`: polls the store for due jobs, claims them, and dispatches
//! to the shared activity registry under bounded concurrency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sagaflow_core::activity::{
    logging_middleware, recovery_middleware, timeout_middleware, ActivityContext, ActivityRegistry,
};
use sagaflow_core::reliability::RetryPolicy;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::backpressure::{BackpressureConfig, BackpressureState};
use crate::config::SchedulerConfig;
use crate::cron_tick;
use crate::error::SchedulerError;
use crate::store::{Job, JobStatus, JobStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    Stopped,
    Running,
    Draining,
}

/// Drives job execution. Construct once per process, share an `Arc` with
/// anything that needs to enqueue work alongside it.
pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    registry: Arc<ActivityRegistry>,
    config: SchedulerConfig,
    retry_policy: RetryPolicy,
    backpressure: Arc<BackpressureState>,
    active: Arc<Semaphore>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    poll_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    cron_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<ActivityRegistry>, config: SchedulerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backpressure = Arc::new(BackpressureState::new(
            BackpressureConfig {
                high_watermark: config.high_watermark,
                low_watermark: config.low_watermark,
            },
            config.max_concurrent_activities,
        ));

        Self {
            store,
            registry,
            active: Arc::new(Semaphore::new(config.max_concurrent_activities)),
            retry_policy: RetryPolicy::exponential(),
            config,
            backpressure,
            running: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            poll_handle: std::sync::Mutex::new(None),
            cron_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn status(&self) -> SchedulerStatus {
        if !self.running.load(Ordering::Relaxed) {
            SchedulerStatus::Stopped
        } else if *self.shutdown_rx.borrow() {
            SchedulerStatus::Draining
        } else {
            SchedulerStatus::Running
        }
    }

    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        info!(
            batch_size = self.config.batch_size,
            max_concurrent_activities = self.config.max_concurrent_activities,
            "starting job scheduler"
        );
        // Every handler bound by this point now runs Logging -> Recovery -> Timeout
        // on dispatch; activities registered after start() won't pick it up.
        self.registry
            .with_middleware(&[logging_middleware(), recovery_middleware(), timeout_middleware()]);
        self.start_poll_loop();
        self.start_cron_loop();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: std::time::Duration) -> Result<(), SchedulerError> {
        if !self.running.load(Ordering::Relaxed) {
            return Ok(());
        }
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + timeout;
        while self.active.available_permits() != self.config.max_concurrent_activities {
            if tokio::time::Instant::now() >= deadline {
                return Err(SchedulerError::ShutdownTimeout);
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        if let Some(handle) = self.poll_handle.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.cron_handle.lock().unwrap().take() {
            handle.abort();
        }
        self.running.store(false, Ordering::SeqCst);
        info!("job scheduler stopped");
        Ok(())
    }

    fn start_poll_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    debug!("poll loop: shutdown requested");
                    break;
                }

                if !this.backpressure.should_accept() {
                    if this.wait_or_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }

                let slots = this.backpressure.available_slots().min(this.config.batch_size as usize);
                if slots == 0 {
                    if this.wait_or_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }

                match this.store.get_pending_jobs(slots as u32).await {
                    Ok(jobs) => this.dispatch_batch(jobs).await,
                    Err(e) => error!("poll failed: {e}"),
                }

                if this.wait_or_shutdown(&mut shutdown_rx).await {
                    break;
                }
            }
            debug!("poll loop exited");
        });

        *self.poll_handle.lock().unwrap() = Some(handle);
    }

    async fn wait_or_shutdown(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval()) => false,
            _ = shutdown_rx.changed() => true,
        }
    }

    async fn dispatch_batch(self: &Arc<Self>, jobs: Vec<Job>) {
        for job in jobs {
            let permit = match Arc::clone(&self.active).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let claimed = match self.store.claim_job(job.id).await {
                Ok(job) => job,
                Err(e) => {
                    debug!(job_id = %job.id, "claim lost: {e}");
                    drop(permit);
                    continue;
                }
            };

            self.backpressure.task_started();
            let this = Arc::clone(self);

            tokio::spawn(async move {
                this.run_job(claimed).await;
                this.backpressure.task_completed();
                drop(permit);
            });
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, task_type = %job.task_type))]
    async fn run_job(&self, job: Job) {
        if !self.registry.has(&job.task_type) {
            warn!("no handler registered for task type");
            let _ = self
                .store
                .update_job_status(job.id, JobStatus::Failed, Some(format!("no handler for {}", job.task_type)))
                .await;
            return;
        }

        let ctx = ActivityContext::new(job.id.to_string(), job.task_type.clone())
            .with_attempt(job.retry_count + 1, job.max_retries + 1)
            .with_timeout(job.timeout);

        match self.registry.invoke(&job.task_type, ctx, job.payload.clone()).await {
            Ok(output) => {
                if let Err(e) = self.store.set_job_result(job.id, output).await {
                    error!("failed to persist job result: {e}");
                }
                if let Err(e) = self.store.update_job_status(job.id, JobStatus::Completed, None).await {
                    error!("failed to mark job completed: {e}");
                }
                if job.is_recurring() {
                    self.reenqueue_recurrence(&job).await;
                }
            }
            Err(activity_err) => {
                let retryable = activity_err.retryable
                    && self.retry_policy.should_retry(activity_err.error_type.as_deref());
                self.handle_failure(job, activity_err.message, retryable).await
            }
        }
    }

    async fn handle_failure(&self, job: Job, message: String, retryable: bool) {
        let retry_count = match self.store.increment_retry_count(job.id).await {
            Ok(count) => count,
            Err(e) => {
                error!("failed to increment retry count: {e}");
                return;
            }
        };

        if retryable && retry_count <= job.max_retries && self.retry_policy.has_attempts_remaining(retry_count) {
            let delay = self.retry_policy.delay_for_attempt(retry_count);
            let next_attempt = chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            warn!(attempt = retry_count, delay_ms = delay.as_millis() as u64, "job failed, retrying: {message}");
            if let Err(e) = self.store.reschedule(job.id, next_attempt).await {
                error!("failed to reschedule retry: {e}");
            }
        } else {
            error!(attempt = retry_count, "job exhausted retries: {message}");
            if let Err(e) = self.store.update_job_status(job.id, JobStatus::Failed, Some(message)).await {
                error!("failed to mark job failed: {e}");
            }
            if job.is_recurring() {
                self.reenqueue_recurrence(&job).await;
            }
        }
    }

    async fn reenqueue_recurrence(&self, job: &Job) {
        let Some(expr) = &job.cron_expression else { return };
        let next = match cron_tick::next_fire_time(expr, chrono::Utc::now()) {
            Ok(Some(next)) => next,
            Ok(None) => return,
            Err(e) => {
                error!("failed to compute next cron fire time: {e}");
                return;
            }
        };

        let mut next_job = Job::new(job.task_type.clone(), job.payload.clone())
            .with_queue(job.queue.clone())
            .with_max_retries(job.max_retries)
            .with_timeout(job.timeout)
            .with_scheduled_at(next);
        next_job.cron_expression = job.cron_expression.clone();
        next_job.cron_entry_id = job.cron_entry_id.clone();
        next_job.metadata = job.metadata.clone();

        if let Err(e) = self.store.save_job(next_job).await {
            error!("failed to enqueue next occurrence: {e}");
        }
    }

    /// Self-healing sweep: for each distinct cron entry, ensure a future
    /// occurrence is queued even if the last dispatch crashed before
    /// `reenqueue_recurrence` ran.
    fn start_cron_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let interval = self.config.cron_tick_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = this.reconcile_cron_entries().await {
                            error!("cron reconciliation failed: {e}");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("cron loop: shutdown requested");
                        break;
                    }
                }
            }
            debug!("cron loop exited");
        });

        *self.cron_handle.lock().unwrap() = Some(handle);
    }

    async fn reconcile_cron_entries(&self) -> Result<(), SchedulerError> {
        let recurring = self.store.get_recurring_jobs().await?;
        let mut latest_by_entry: HashMap<String, &Job> = HashMap::new();
        for job in &recurring {
            let Some(entry_id) = &job.cron_entry_id else { continue };
            latest_by_entry
                .entry(entry_id.clone())
                .and_modify(|existing| {
                    if job.created_at > existing.created_at {
                        *existing = job;
                    }
                })
                .or_insert(job);
        }

        for job in latest_by_entry.into_values() {
            if job.status.is_terminal() {
                self.reenqueue_recurrence(job).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sagaflow_core::activity::Activity;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::store::InMemoryJobStore;

    #[derive(Serialize, Deserialize)]
    struct Ping;

    struct Echo;

    #[async_trait::async_trait]
    impl Activity for Echo {
        const TYPE: &'static str = "echo";
        type Input = Ping;
        type Output = Ping;

        async fn execute(
            &self,
            _ctx: &ActivityContext,
            input: Self::Input,
        ) -> Result<Self::Output, sagaflow_core::activity::ActivityError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn dispatches_pending_job_to_completion() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(ActivityRegistry::new());
        registry.register_typed(Echo);

        let scheduler = Arc::new(JobScheduler::new(store.clone(), registry, SchedulerConfig::default()));
        let job = store.save_job(Job::new("echo", serde_json::json!(null))).await.unwrap();

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.shutdown(Duration::from_secs(2)).await.unwrap();

        let finished = store.get_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_task_type_fails_without_retry() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(ActivityRegistry::new());
        let scheduler = Arc::new(JobScheduler::new(store.clone(), registry, SchedulerConfig::default()));
        let job = store.save_job(Job::new("missing", serde_json::json!(null))).await.unwrap();

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.shutdown(Duration::from_secs(2)).await.unwrap();

        let finished = store.get_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
    }

    struct AlwaysFailsNonRetryable;

    #[async_trait::async_trait]
    impl Activity for AlwaysFailsNonRetryable {
        const TYPE: &'static str = "bad_input";
        type Input = Ping;
        type Output = Ping;

        async fn execute(
            &self,
            _ctx: &ActivityContext,
            _input: Self::Input,
        ) -> Result<Self::Output, sagaflow_core::activity::ActivityError> {
            Err(sagaflow_core::activity::ActivityError::non_retryable("malformed input"))
        }
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_on_first_attempt() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(ActivityRegistry::new());
        registry.register_typed(AlwaysFailsNonRetryable);

        let scheduler = Arc::new(JobScheduler::new(store.clone(), registry, SchedulerConfig::default()));
        let job = store
            .save_job(Job::new("bad_input", serde_json::json!(null)).with_max_retries(5))
            .await
            .unwrap();

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.shutdown(Duration::from_secs(2)).await.unwrap();

        let finished = store.get_job(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.retry_count, 1);
    }
}
