//! Executes a [`WorkflowDefinition`] against a [`WorkflowStore`], persisting
//! the current step index and each step's output after every activity so a
//! crash mid-run resumes instead of replaying from the start.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use uuid::Uuid;

use crate::activity::{ActivityContext, ActivityRegistry};
use crate::compensation::CompensationManager;
use crate::store::{HistoryEvent, WorkflowExecution, WorkflowStatus, WorkflowStore};

use super::definition::{Step, WorkflowDefinition, WorkflowOptions};
use super::error::EngineError;

pub struct WorkflowEngine<S: WorkflowStore> {
    store: Arc<S>,
    registry: Arc<ActivityRegistry>,
    options: WorkflowOptions,
    /// Pending cancellation requests, keyed by execution id. Checked
    /// cooperatively between steps, not preemptively mid-activity.
    cancellations: RwLock<HashMap<Uuid, String>>,
}

impl<S: WorkflowStore> WorkflowEngine<S> {
    pub fn new(store: Arc<S>, registry: Arc<ActivityRegistry>) -> Self {
        Self {
            store,
            registry,
            options: WorkflowOptions::default(),
            cancellations: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    /// Create and run a new workflow instance to completion (or failure, or
    /// cancellation). Returns the execution id.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
        input: serde_json::Value,
    ) -> Result<Uuid, EngineError> {
        let execution = WorkflowExecution::new(workflow_id, &definition.workflow_type, input);
        let saved = self.store.save_execution(execution).await?;
        self.run(saved.id, saved.workflow_id.clone(), definition).await?;
        Ok(saved.id)
    }

    /// Re-enter a previously started instance at its persisted step index.
    /// A no-op if the instance is already terminal.
    pub async fn resume_workflow(&self, id: Uuid, definition: &WorkflowDefinition) -> Result<(), EngineError> {
        let exec = self.store.get_execution(id).await?;
        if exec.status.is_terminal() {
            return Ok(());
        }
        self.run(id, exec.workflow_id, definition).await
    }

    /// Request cancellation. A terminal workflow ignores this and returns
    /// success; a running one finishes its current activity, skips the
    /// rest, and transitions to `canceled`.
    pub async fn cancel_workflow(&self, id: Uuid, reason: Option<String>) -> Result<(), EngineError> {
        let exec = self.store.get_execution(id).await?;
        if exec.status.is_terminal() {
            return Ok(());
        }
        self.cancellations
            .write()
            .insert(id, reason.unwrap_or_else(|| "canceled by user".to_string()));
        Ok(())
    }

    pub async fn get_history(&self, id: Uuid) -> Result<Vec<HistoryEvent>, EngineError> {
        Ok(self.store.load_history(id).await?)
    }

    fn cancellation_reason(&self, id: Uuid) -> Option<String> {
        self.cancellations.read().get(&id).cloned()
    }

    fn clear_cancellation(&self, id: Uuid) {
        self.cancellations.write().remove(&id);
    }

    async fn run(&self, id: Uuid, workflow_id: String, definition: &WorkflowDefinition) -> Result<(), EngineError> {
        self.store.update_status(id, WorkflowStatus::Running, None).await?;
        self.store
            .append_history(id, "workflow_started", json!({ "workflow_type": definition.workflow_type }))
            .await?;

        let exec = self.store.get_execution(id).await?;
        let mut step_index = exec.next_step_index;

        let mut compensation = CompensationManager::new();
        for step in &definition.compensations {
            compensation.register(step.clone());
        }
        for step in definition.steps.iter().take(step_index) {
            compensation.record_execution(step.step_id());
        }

        let mut failure: Option<String> = None;

        while step_index < definition.steps.len() {
            if let Some(reason) = self.cancellation_reason(id) {
                self.store
                    .update_status(id, WorkflowStatus::Canceled, Some(reason))
                    .await?;
                self.store.append_history(id, "workflow_canceled", json!({})).await?;
                if definition.is_compensated() {
                    let records = compensation.compensate(&workflow_id, &self.registry).await;
                    self.store.update_compensations(id, records).await?;
                }
                self.clear_cancellation(id);
                return Ok(());
            }

            if failure.is_some() && definition.stop_on_failure {
                for skipped in &definition.steps[step_index..] {
                    self.store
                        .append_history(
                            id,
                            "step_skipped",
                            json!({
                                "step_id": skipped.step_id(),
                                "reason": "skipped due to previous failure",
                            }),
                        )
                        .await?;
                }
                break;
            }

            let step = &definition.steps[step_index];
            match step {
                Step::Activity(call) => match self.run_call(&workflow_id, call, definition).await {
                    Ok(output) => {
                        self.store.update_progress(id, step_index + 1, &call.step_id, output).await?;
                        self.store
                            .append_history(id, "activity_completed", json!({ "step_id": call.step_id }))
                            .await?;
                        compensation.record_execution(&call.step_id);
                    }
                    Err(err) => {
                        self.store
                            .append_history(
                                id,
                                "activity_failed",
                                json!({ "step_id": call.step_id, "error": err.to_string() }),
                            )
                            .await?;
                        failure.get_or_insert(err.to_string());
                    }
                },
                Step::Validation(call) => match self.run_call(&workflow_id, call, definition).await {
                    Ok(output) => {
                        let valid = output.get("valid").and_then(|v| v.as_bool()).unwrap_or(true);
                        self.store.update_progress(id, step_index + 1, &call.step_id, output).await?;
                        if valid {
                            compensation.record_execution(&call.step_id);
                        } else {
                            self.store
                                .append_history(id, "validation_failed", json!({ "step_id": call.step_id }))
                                .await?;
                            failure.get_or_insert(format!("validation failed at step '{}'", call.step_id));
                        }
                    }
                    Err(err) => {
                        failure.get_or_insert(err.to_string());
                    }
                },
                Step::Parallel(block) => {
                    // A branch whose step_id is already in step_outputs committed on a
                    // prior attempt (we crashed mid-block before the block as a whole
                    // advanced next_step_index). Reuse it instead of re-running it.
                    let mut block_output = serde_json::Map::new();
                    let mut first_error = None;
                    let mut pending = Vec::new();

                    for call in &block.calls {
                        if let Some(output) = exec.step_outputs.get(&call.step_id) {
                            block_output.insert(call.step_id.clone(), output.clone());
                            compensation.record_execution(&call.step_id);
                        } else {
                            pending.push(call);
                        }
                    }

                    let futures = pending
                        .iter()
                        .map(|call| self.run_parallel_call(id, &workflow_id, call, definition));
                    let outcomes = futures::future::join_all(futures).await;

                    for (call, outcome) in pending.iter().zip(outcomes.into_iter()) {
                        match outcome? {
                            Ok(output) => {
                                block_output.insert(call.step_id.clone(), output);
                                compensation.record_execution(&call.step_id);
                            }
                            Err(msg) => {
                                first_error.get_or_insert(format!("{}: {}", call.step_id, msg));
                            }
                        }
                    }

                    self.store
                        .update_progress(id, step_index + 1, &block.step_id, serde_json::Value::Object(block_output))
                        .await?;

                    if let Some(err) = first_error {
                        failure.get_or_insert(err);
                    }
                }
            }

            step_index += 1;
        }

        if let Some(err) = failure {
            if definition.is_compensated() {
                let records = compensation.compensate(&workflow_id, &self.registry).await;
                self.store.update_compensations(id, records).await?;
            }
            self.store.update_status(id, WorkflowStatus::Failed, Some(err)).await?;
            self.store.append_history(id, "workflow_failed", json!({})).await?;
        } else {
            let exec = self.store.get_execution(id).await?;
            let output: serde_json::Map<String, serde_json::Value> = exec.step_outputs.into_iter().collect();
            self.store.update_output(id, serde_json::Value::Object(output)).await?;
            self.store.update_status(id, WorkflowStatus::Completed, None).await?;
            self.store.append_history(id, "workflow_completed", json!({})).await?;
        }

        Ok(())
    }

    /// Runs one branch of a parallel block and persists its outcome the
    /// moment it resolves, independent of the other branches still running.
    /// The outer `Result` is a store/infra failure (aborts the whole run);
    /// the inner one is the branch's own business outcome.
    async fn run_parallel_call(
        &self,
        id: Uuid,
        workflow_id: &str,
        call: &super::definition::ActivityCall,
        definition: &WorkflowDefinition,
    ) -> Result<Result<serde_json::Value, String>, EngineError> {
        match self.run_call(workflow_id, call, definition).await {
            Ok(output) => {
                self.store.record_step_output(id, &call.step_id, output.clone()).await?;
                self.store
                    .append_history(id, "activity_completed", json!({ "step_id": call.step_id }))
                    .await?;
                Ok(Ok(output))
            }
            Err(err) => {
                self.store
                    .append_history(
                        id,
                        "activity_failed",
                        json!({ "step_id": call.step_id, "error": err.to_string() }),
                    )
                    .await?;
                Ok(Err(err.to_string()))
            }
        }
    }

    async fn run_call(
        &self,
        workflow_id: &str,
        call: &super::definition::ActivityCall,
        definition: &WorkflowDefinition,
    ) -> Result<serde_json::Value, crate::activity::ActivityError> {
        let policy = call
            .options
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.options.default_retry_policy.clone());
        let timeout = call.options.timeout.unwrap_or(self.options.default_timeout);
        let _ = definition;

        let mut attempt = 1;
        loop {
            let ctx = ActivityContext::new(workflow_id, &call.step_id)
                .with_attempt(attempt, policy.max_attempts)
                .with_timeout(timeout);
            match self.registry.invoke(&call.activity_type, ctx, call.input.clone()).await {
                Ok(output) => return Ok(output),
                Err(err) => {
                    let retryable = err.retryable
                        && policy.should_retry(err.error_type.as_deref())
                        && policy.has_attempts_remaining(attempt);
                    if !retryable {
                        return Err(err);
                    }
                    tokio::time::sleep(policy.delay_for_attempt(attempt + 1)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ActivityContext as Ctx, ActivityError};
    use crate::engine::{ActivityCall, ParallelBlock};
    use crate::store::InMemoryWorkflowStore;
    use async_trait::async_trait;

    struct AlwaysOk;

    #[async_trait]
    impl Activity for AlwaysOk {
        const TYPE: &'static str = "always_ok";
        type Input = serde_json::Value;
        type Output = serde_json::Value;

        async fn execute(&self, _ctx: &Ctx, input: Self::Input) -> Result<Self::Output, ActivityError> {
            Ok(input)
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Activity for AlwaysFails {
        const TYPE: &'static str = "always_fails";
        type Input = serde_json::Value;
        type Output = serde_json::Value;

        async fn execute(&self, _ctx: &Ctx, _input: Self::Input) -> Result<Self::Output, ActivityError> {
            Err(ActivityError::non_retryable("boom"))
        }
    }

    fn engine() -> (WorkflowEngine<InMemoryWorkflowStore>, Arc<ActivityRegistry>) {
        let registry = Arc::new(ActivityRegistry::new());
        registry.register_typed(AlwaysOk);
        registry.register_typed(AlwaysFails);
        let store = Arc::new(InMemoryWorkflowStore::new());
        (WorkflowEngine::new(store, registry.clone()), registry)
    }

    #[tokio::test]
    async fn sequential_pipeline_completes() {
        let (engine, _registry) = engine();
        let definition = WorkflowDefinition::new("ai-pipeline").with_steps(vec![
            Step::Activity(ActivityCall::new("a", "always_ok", json!("x"))),
            Step::Activity(ActivityCall::new("b", "always_ok", json!("y"))),
        ]);

        let id = engine.execute_workflow("wf1", &definition, json!({})).await.unwrap();
        let exec = engine.store.get_execution(id).await.unwrap();
        assert_eq!(exec.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn failing_step_marks_workflow_failed() {
        let (engine, _registry) = engine();
        let definition = WorkflowDefinition::new("ai-pipeline").with_steps(vec![Step::Activity(
            ActivityCall::new("a", "always_fails", json!("x")),
        )]);

        let id = engine.execute_workflow("wf2", &definition, json!({})).await.unwrap();
        let exec = engine.store.get_execution(id).await.unwrap();
        assert_eq!(exec.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn parallel_block_records_each_outcome() {
        let (engine, _registry) = engine();
        let definition = WorkflowDefinition::new("ai-pipeline").with_step(Step::Parallel(ParallelBlock::new(
            "fan-out",
            vec![
                ActivityCall::new("a", "always_ok", json!(1)),
                ActivityCall::new("b", "always_fails", json!(2)),
            ],
        )));

        let id = engine.execute_workflow("wf3", &definition, json!({})).await.unwrap();
        let exec = engine.store.get_execution(id).await.unwrap();
        assert_eq!(exec.status, WorkflowStatus::Failed);
        assert!(exec.step_outputs.contains_key("fan-out"));
    }

    #[tokio::test]
    async fn resuming_mid_parallel_block_skips_already_completed_branches() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingOk(Arc<AtomicUsize>);

        #[async_trait]
        impl Activity for CountingOk {
            const TYPE: &'static str = "counting_ok";
            type Input = serde_json::Value;
            type Output = serde_json::Value;

            async fn execute(&self, _ctx: &Ctx, input: Self::Input) -> Result<Self::Output, ActivityError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(input)
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ActivityRegistry::new());
        registry.register_typed(CountingOk(calls.clone()));
        let store = Arc::new(InMemoryWorkflowStore::new());
        let engine = WorkflowEngine::new(store.clone(), registry);

        let definition = WorkflowDefinition::new("ai-pipeline").with_step(Step::Parallel(ParallelBlock::new(
            "fan-out",
            vec![
                ActivityCall::new("a", "counting_ok", json!(1)),
                ActivityCall::new("b", "counting_ok", json!(2)),
            ],
        )));

        let execution = WorkflowExecution::new("wf-resume", &definition.workflow_type, json!({}));
        let saved = store.save_execution(execution).await.unwrap();
        // Simulate a crash after branch "a" committed but before the block advanced.
        store.record_step_output(saved.id, "a", json!("done-before-crash")).await.unwrap();

        engine.resume_workflow(saved.id, &definition).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "only branch b should have run");
        let exec = store.get_execution(saved.id).await.unwrap();
        assert_eq!(exec.status, WorkflowStatus::Completed);
        assert_eq!(exec.step_outputs.get("a"), Some(&json!("done-before-crash")));
        assert!(exec.step_outputs.contains_key("b"));
    }

    #[tokio::test]
    async fn cancel_before_run_marks_canceled() {
        let (engine, _registry) = engine();
        let definition = WorkflowDefinition::new("ai-pipeline").with_steps(vec![
            Step::Activity(ActivityCall::new("a", "always_ok", json!(1))),
            Step::Activity(ActivityCall::new("b", "always_ok", json!(2))),
        ]);

        let execution = WorkflowExecution::new("wf4", &definition.workflow_type, json!({}));
        let saved = engine.store.save_execution(execution).await.unwrap();
        engine.cancel_workflow(saved.id, None).await.unwrap();
        engine.run(saved.id, saved.workflow_id.clone(), &definition).await.unwrap();

        let exec = engine.store.get_execution(saved.id).await.unwrap();
        assert_eq!(exec.status, WorkflowStatus::Canceled);
        assert_eq!(exec.error.as_deref(), Some("canceled by user"));
    }
}
