//! The closed set of compensation kinds.
//!
//! Rather than five ad hoc activity structs, every kind shares one
//! tagged-payload handler contract so the compensation manager (and any
//! caller building a `CompensationStep`) matches exhaustively over the set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sagaflow_core::activity::{Activity, ActivityContext, ActivityError, ActivityRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackKind {
    Agent,
    File,
    Api,
    Notification,
    Database,
}

/// Registry name each kind is bound under. `AIAgentPipelineWithCompensation`
/// only ever reaches for [`ROLLBACK_AGENT`]; the others exist so a
/// definition built outside this crate can declare the matching
/// compensation kind without inventing its own activity name.
pub const ROLLBACK_AGENT: &str = "RollbackAgent";
pub const ROLLBACK_FILE: &str = "RollbackFile";
pub const ROLLBACK_API: &str = "RollbackAPI";
pub const ROLLBACK_NOTIFICATION: &str = "RollbackNotification";
pub const ROLLBACK_DATABASE: &str = "RollbackDatabase";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub kind: RollbackKind,
    pub target: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub kind: RollbackKind,
    pub undone: bool,
}

/// Undoes one previously-committed step. A real deployment swaps this for
/// a handler that actually talks to the agent/file/API/notification/database
/// backend named by `kind`; this one stands in as the "always succeeds"
/// best-effort default, matching the "no handler configured" semantics the
/// compensation manager already gives an unbound activity name.
pub struct RollbackActivity;

#[async_trait]
impl Activity for RollbackActivity {
    const TYPE: &'static str = "system:rollback";
    type Input = RollbackRequest;
    type Output = RollbackResult;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        tracing::debug!(kind = ?input.kind, "compensating step");
        Ok(RollbackResult {
            kind: input.kind,
            undone: true,
        })
    }
}

/// Binds [`RollbackActivity`] under every name the reference definitions
/// reference (`RollbackAgent`, `RollbackFile`, ...).
pub fn register_rollback_activities(registry: &ActivityRegistry) {
    for name in [
        ROLLBACK_AGENT,
        ROLLBACK_FILE,
        ROLLBACK_API,
        ROLLBACK_NOTIFICATION,
        ROLLBACK_DATABASE,
    ] {
        registry.register_typed_as(name, RollbackActivity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagaflow_core::activity::ActivityContext;

    #[tokio::test]
    async fn rollback_always_succeeds() {
        let activity = RollbackActivity;
        let ctx = ActivityContext::new("wf", "rollback-1");
        let result = activity
            .execute(
                &ctx,
                RollbackRequest {
                    kind: RollbackKind::Agent,
                    target: serde_json::json!({"agent_id": "a1"}),
                },
            )
            .await
            .unwrap();
        assert!(result.undone);
    }
}
