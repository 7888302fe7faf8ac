//! Reference workflow definitions: the AI agent pipeline (with and without
//! compensation) and the test-suite runner, built on `sagaflow_core`'s
//! step-list `WorkflowDefinition`.

pub mod ai_agent_pipeline;
pub mod rollback;
pub mod test_suite;

pub mod prelude {
    pub use crate::ai_agent_pipeline::{
        ai_agent_pipeline, ai_agent_pipeline_with_compensation, FanOut,
    };
    pub use crate::rollback::{register_rollback_activities, RollbackActivity, RollbackKind};
    pub use crate::test_suite::{test_suite, Execution};
}
