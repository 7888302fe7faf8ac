//! LIFO unwinding of a workflow instance's committed steps.

use crate::activity::{ActivityContext, ActivityRegistry};
use crate::reliability::RetryPolicy;
use crate::store::{CompensationRecord, CompensationRecordStatus};

/// One step the definition declared as compensable.
#[derive(Clone)]
pub struct CompensationStep {
    pub activity_name: String,
    /// Registry name of the rollback activity. `None` means "no handler
    /// configured", the manager treats that as an immediate success
    /// (best-effort undo).
    pub compensate_activity: Option<String>,
    pub input: serde_json::Value,
    pub retry_policy: RetryPolicy,
    pub allow_skip: bool,
}

impl CompensationStep {
    pub fn new(activity_name: impl Into<String>) -> Self {
        Self {
            activity_name: activity_name.into(),
            compensate_activity: None,
            input: serde_json::Value::Null,
            retry_policy: RetryPolicy::no_retry(),
            allow_skip: false,
        }
    }

    pub fn with_compensate_activity(mut self, name: impl Into<String>) -> Self {
        self.compensate_activity = Some(name.into());
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn allow_skip(mut self) -> Self {
        self.allow_skip = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationOutcome {
    Completed,
    Skipped,
    Failed(String),
}

/// Tracks the steps one workflow instance declared and which of them
/// actually committed, then unwinds the committed prefix in reverse order.
pub struct CompensationManager {
    registered: Vec<CompensationStep>,
    executed: Vec<String>,
}

impl CompensationManager {
    pub fn new() -> Self {
        Self {
            registered: vec![],
            executed: vec![],
        }
    }

    pub fn register(&mut self, step: CompensationStep) {
        self.registered.push(step);
    }

    /// Call immediately after the forward activity named `activity_name`
    /// commits successfully.
    pub fn record_execution(&mut self, activity_name: &str) {
        self.executed.push(activity_name.to_string());
    }

    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Run compensations for the executed prefix in reverse order. Stops
    /// at the first step whose compensation fails with `allow_skip=false`;
    /// earlier (not-yet-compensated) steps are left out of the returned
    /// records entirely, matching "the unwind aborted here".
    pub async fn compensate(
        &self,
        workflow_id: &str,
        registry: &ActivityRegistry,
    ) -> Vec<CompensationRecord> {
        let mut records = Vec::new();

        for activity_name in self.executed.iter().rev() {
            let Some(step) = self.registered.iter().find(|s| &s.activity_name == activity_name) else {
                continue;
            };

            let outcome = self.run_one(workflow_id, step, registry).await;
            let (status, error) = match &outcome {
                CompensationOutcome::Completed => (CompensationRecordStatus::Completed, None),
                CompensationOutcome::Skipped => (CompensationRecordStatus::Skipped, None),
                CompensationOutcome::Failed(msg) => (CompensationRecordStatus::Failed, Some(msg.clone())),
            };

            tracing::info!(
                workflow_id = %workflow_id,
                activity = %step.activity_name,
                outcome = ?outcome,
                "compensation step finished"
            );

            let aborted = matches!(outcome, CompensationOutcome::Failed(_)) && !step.allow_skip;

            records.push(CompensationRecord {
                name: step.activity_name.clone(),
                status,
                error,
                executed_at: chrono::Utc::now(),
            });

            if aborted {
                break;
            }
        }

        records
    }

    async fn run_one(
        &self,
        workflow_id: &str,
        step: &CompensationStep,
        registry: &ActivityRegistry,
    ) -> CompensationOutcome {
        let Some(compensate_activity) = &step.compensate_activity else {
            return CompensationOutcome::Completed;
        };

        let mut attempt = 1;
        loop {
            let ctx = ActivityContext::new(workflow_id, &step.activity_name)
                .with_attempt(attempt, step.retry_policy.max_attempts);
            match registry
                .invoke(compensate_activity, ctx, step.input.clone())
                .await
            {
                Ok(_) => return CompensationOutcome::Completed,
                Err(err) => {
                    let retryable = err.retryable
                        && step.retry_policy.should_retry(err.error_type.as_deref())
                        && step.retry_policy.has_attempts_remaining(attempt);
                    if !retryable {
                        return if step.allow_skip {
                            CompensationOutcome::Skipped
                        } else {
                            CompensationOutcome::Failed(err.to_string())
                        };
                    }
                    tokio::time::sleep(step.retry_policy.delay_for_attempt(attempt + 1)).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for CompensationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ActivityError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingRollback {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Activity for RecordingRollback {
        const TYPE: &'static str = "rollback_ok";
        type Input = serde_json::Value;
        type Output = serde_json::Value;

        async fn execute(
            &self,
            _ctx: &ActivityContext,
            input: Self::Input,
        ) -> Result<Self::Output, ActivityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(input)
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Activity for AlwaysFails {
        const TYPE: &'static str = "rollback_fails";
        type Input = serde_json::Value;
        type Output = serde_json::Value;

        async fn execute(
            &self,
            _ctx: &ActivityContext,
            _input: Self::Input,
        ) -> Result<Self::Output, ActivityError> {
            Err(ActivityError::non_retryable("cannot undo"))
        }
    }

    #[tokio::test]
    async fn compensations_run_in_reverse_order() {
        let registry = ActivityRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register_typed(RecordingRollback { calls: calls.clone() });

        let mut manager = CompensationManager::new();
        manager.register(CompensationStep::new("a").with_compensate_activity("rollback_ok"));
        manager.register(CompensationStep::new("b").with_compensate_activity("rollback_ok"));
        manager.record_execution("a");
        manager.record_execution("b");

        let records = manager.compensate("wf1", &registry).await;
        assert_eq!(records[0].name, "b");
        assert_eq!(records[1].name, "a");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_handler_is_immediate_success() {
        let registry = ActivityRegistry::new();
        let mut manager = CompensationManager::new();
        manager.register(CompensationStep::new("a"));
        manager.record_execution("a");

        let records = manager.compensate("wf1", &registry).await;
        assert_eq!(records[0].status, CompensationRecordStatus::Completed);
    }

    #[tokio::test]
    async fn allow_skip_continues_past_failure() {
        let registry = ActivityRegistry::new();
        registry.register_typed(AlwaysFails);
        registry.register_typed(RecordingRollback {
            calls: Arc::new(AtomicUsize::new(0)),
        });

        let mut manager = CompensationManager::new();
        manager.register(
            CompensationStep::new("a")
                .with_compensate_activity("rollback_fails")
                .allow_skip(),
        );
        manager.register(CompensationStep::new("b").with_compensate_activity("rollback_ok"));
        manager.record_execution("a");
        manager.record_execution("b");

        let records = manager.compensate("wf1", &registry).await;
        assert_eq!(records[0].name, "b");
        assert_eq!(records[0].status, CompensationRecordStatus::Completed);
        assert_eq!(records[1].name, "a");
        assert_eq!(records[1].status, CompensationRecordStatus::Skipped);
    }

    #[tokio::test]
    async fn non_skippable_failure_aborts_unwind() {
        let registry = ActivityRegistry::new();
        registry.register_typed(AlwaysFails);
        registry.register_typed(RecordingRollback {
            calls: Arc::new(AtomicUsize::new(0)),
        });

        let mut manager = CompensationManager::new();
        manager.register(CompensationStep::new("a").with_compensate_activity("rollback_ok"));
        manager.register(CompensationStep::new("b").with_compensate_activity("rollback_fails"));
        manager.record_execution("a");
        manager.record_execution("b");

        let records = manager.compensate("wf1", &registry).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "b");
        assert_eq!(records[0].status, CompensationRecordStatus::Failed);
    }
}
