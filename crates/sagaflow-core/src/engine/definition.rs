//! Workflow definitions are data: an ordered list of steps, not a
//! hand-coded callback state machine.

use std::time::Duration;

use crate::compensation::CompensationStep;
use crate::reliability::RetryPolicy;

/// Per-call override of the engine/workflow default timeout and retry
/// policy.
#[derive(Clone, Default)]
pub struct ActivityOptions {
    pub timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
}

impl ActivityOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// One activity invocation inside a definition.
#[derive(Clone)]
pub struct ActivityCall {
    /// Unique within one definition; keys `step_outputs` and compensation
    /// lookups.
    pub step_id: String,
    pub activity_type: String,
    pub input: serde_json::Value,
    pub options: ActivityOptions,
}

impl ActivityCall {
    pub fn new(step_id: impl Into<String>, activity_type: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            step_id: step_id.into(),
            activity_type: activity_type.into(),
            input,
            options: ActivityOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ActivityOptions) -> Self {
        self.options = options;
        self
    }
}

/// A fan-out of activity calls that all run concurrently; the block
/// completes when every call has reported an outcome.
#[derive(Clone)]
pub struct ParallelBlock {
    pub step_id: String,
    pub calls: Vec<ActivityCall>,
}

impl ParallelBlock {
    pub fn new(step_id: impl Into<String>, calls: Vec<ActivityCall>) -> Self {
        Self {
            step_id: step_id.into(),
            calls,
        }
    }
}

#[derive(Clone)]
pub enum Step {
    Activity(ActivityCall),
    Parallel(ParallelBlock),
    /// An activity whose output carries `{"valid": bool, ...}`; `valid:
    /// false` fails the workflow immediately without retrying.
    Validation(ActivityCall),
}

impl Step {
    pub fn step_id(&self) -> &str {
        match self {
            Step::Activity(c) => &c.step_id,
            Step::Validation(c) => &c.step_id,
            Step::Parallel(b) => &b.step_id,
        }
    }
}

/// Engine-wide defaults applied when a step carries no override.
#[derive(Clone)]
pub struct WorkflowOptions {
    pub default_timeout: Duration,
    pub default_retry_policy: RetryPolicy,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30 * 60),
            default_retry_policy: RetryPolicy::default(),
        }
    }
}

/// An ordered composition of steps, plus the compensation steps (if any)
/// that undo them on failure.
#[derive(Clone)]
pub struct WorkflowDefinition {
    pub workflow_type: String,
    pub steps: Vec<Step>,
    /// `true` (the pipeline default): stop at the first failed step and
    /// leave the rest unrun. `false` (the test-suite variant): run every
    /// step regardless of earlier failures, reporting overall failure if
    /// any step failed.
    pub stop_on_failure: bool,
    /// Compensation steps keyed by the `step_id` of the activity they
    /// undo. Empty means the definition has no saga behavior.
    pub compensations: Vec<CompensationStep>,
}

impl WorkflowDefinition {
    pub fn new(workflow_type: impl Into<String>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            steps: vec![],
            stop_on_failure: true,
            compensations: vec![],
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.stop_on_failure = false;
        self
    }

    pub fn with_compensation(mut self, step: CompensationStep) -> Self {
        self.compensations.push(step);
        self
    }

    pub fn is_compensated(&self) -> bool {
        !self.compensations.is_empty()
    }
}
