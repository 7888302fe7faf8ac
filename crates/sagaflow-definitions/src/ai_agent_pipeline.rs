//! `AIAgentPipeline` / `AIAgentPipelineWithCompensation`: validate → N agent
//! activities → store result → notify.

use sagaflow_core::compensation::CompensationStep;
use sagaflow_core::engine::{ActivityCall, ParallelBlock, Step, WorkflowDefinition};

use crate::rollback::ROLLBACK_AGENT;

pub const VALIDATE_ACTIVITY: &str = "ValidateAgentInput";
pub const AGENT_ACTIVITY: &str = "RunAgent";
pub const STORE_ACTIVITY: &str = "StoreAgentResult";
pub const NOTIFY_ACTIVITY: &str = "NotifyAgentComplete";

/// Whether the agent steps run one after another or all at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    Sequential,
    Parallel,
}

/// `validate → (sequential|parallel) N agent activities → store → notify`.
/// No compensation; a failed agent call simply fails the workflow.
pub fn ai_agent_pipeline(agent_inputs: Vec<serde_json::Value>, fan_out: FanOut) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("AIAgentPipeline").with_step(Step::Validation(ActivityCall::new(
        "validate",
        VALIDATE_ACTIVITY,
        serde_json::json!({ "agent_count": agent_inputs.len() }),
    )));

    def = match fan_out {
        FanOut::Sequential => {
            for (i, input) in agent_inputs.iter().enumerate() {
                def = def.with_step(Step::Activity(ActivityCall::new(
                    format!("agent-{i}"),
                    AGENT_ACTIVITY,
                    input.clone(),
                )));
            }
            def
        }
        FanOut::Parallel => {
            let calls = agent_inputs
                .iter()
                .enumerate()
                .map(|(i, input)| ActivityCall::new(format!("agent-{i}"), AGENT_ACTIVITY, input.clone()))
                .collect();
            def.with_step(Step::Parallel(ParallelBlock::new("agents", calls)))
        }
    };

    def.with_step(Step::Activity(ActivityCall::new(
        "store",
        STORE_ACTIVITY,
        serde_json::json!({}),
    )))
    .with_step(Step::Activity(ActivityCall::new(
        "notify",
        NOTIFY_ACTIVITY,
        serde_json::json!({}),
    )))
}

/// Same shape as [`ai_agent_pipeline`], with each agent step wrapped in a
/// `RollbackAgent` compensation, a skippable storage step, and a no-op
/// notification compensation (an already-sent notification can't be
/// unsent, so its compensation has no `compensate_activity`).
pub fn ai_agent_pipeline_with_compensation(
    agent_inputs: Vec<serde_json::Value>,
    fan_out: FanOut,
) -> WorkflowDefinition {
    let agent_count = agent_inputs.len();
    let mut def = ai_agent_pipeline(agent_inputs.clone(), fan_out);

    for i in 0..agent_count {
        def = def.with_compensation(
            CompensationStep::new(format!("agent-{i}"))
                .with_compensate_activity(ROLLBACK_AGENT)
                .with_input(serde_json::json!({ "kind": "agent", "target": agent_inputs[i] })),
        );
    }

    def.with_compensation(CompensationStep::new("store").allow_skip())
        .with_compensation(CompensationStep::new("notify"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_pipeline_has_no_compensation() {
        let def = ai_agent_pipeline(vec![serde_json::json!({"prompt": "a"})], FanOut::Sequential);
        assert!(!def.is_compensated());
        assert_eq!(def.steps.len(), 4); // validate, agent-0, store, notify
    }

    #[test]
    fn compensated_pipeline_registers_one_compensation_per_agent_plus_store_and_notify() {
        let inputs = vec![serde_json::json!({"prompt": "a"}), serde_json::json!({"prompt": "b"})];
        let def = ai_agent_pipeline_with_compensation(inputs, FanOut::Sequential);
        assert!(def.is_compensated());
        assert_eq!(def.compensations.len(), 4); // 2 agents + store + notify
    }

    #[test]
    fn parallel_fan_out_uses_a_single_parallel_step() {
        let inputs = vec![serde_json::json!({"prompt": "a"}), serde_json::json!({"prompt": "b"})];
        let def = ai_agent_pipeline(inputs, FanOut::Parallel);
        assert_eq!(def.steps.len(), 4); // validate, parallel agents, store, notify
        assert!(matches!(def.steps[1], Step::Parallel(_)));
    }
}
