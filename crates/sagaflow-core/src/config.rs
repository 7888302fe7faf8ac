//! Typed engine configuration, loadable from the environment via `envy`
//! the way the wider corpus loads service config via `dotenvy`.

use std::time::Duration;

use serde::Deserialize;

use crate::reliability::RetryPolicy;

fn default_default_timeout_secs() -> u64 {
    1800
}

fn default_max_concurrent_workflows() -> u32 {
    100
}

fn default_max_concurrent_activities() -> u32 {
    100
}

/// Environment-deserializable shape of [`EngineConfig`]. `envy` flattens
/// env vars like `SAGAFLOW_STORE_DSN` into this struct's fields.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub store_dsn: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_task_queue")]
    pub task_queue: String,

    #[serde(default = "default_max_concurrent_workflows")]
    pub max_concurrent_workflows: u32,

    #[serde(default = "default_max_concurrent_activities")]
    pub max_concurrent_activities: u32,

    #[serde(default = "default_default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_task_queue() -> String {
    "sagaflow".to_string()
}

impl EngineConfig {
    /// Load from environment variables prefixed `SAGAFLOW_` (e.g.
    /// `SAGAFLOW_STORE_DSN`, `SAGAFLOW_NAMESPACE`).
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("SAGAFLOW_").from_env()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn effective_retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_vars_absent() {
        std::env::set_var("SAGAFLOW_TEST_STORE_DSN", "postgres://localhost/test");
        let config: Result<EngineConfig, _> = envy::prefixed("SAGAFLOW_TEST_").from_env();
        let config = config.unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.max_concurrent_workflows, 100);
        std::env::remove_var("SAGAFLOW_TEST_STORE_DSN");
    }
}
