//! Typed scheduler configuration, loadable from the environment via `envy`.

use std::time::Duration;

use serde::Deserialize;

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> u32 {
    100
}

fn default_max_concurrent_activities() -> usize {
    100
}

fn default_cron_tick_interval_ms() -> u64 {
    1000
}

fn default_high_watermark() -> f64 {
    0.9
}

fn default_low_watermark() -> f64 {
    0.7
}

/// Environment-deserializable shape of [`SchedulerConfig`]. `envy` flattens
/// env vars like `SAGAFLOW_SCHEDULER_BATCH_SIZE` into this struct's fields.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_max_concurrent_activities")]
    pub max_concurrent_activities: usize,

    #[serde(default = "default_cron_tick_interval_ms")]
    pub cron_tick_interval_ms: u64,

    #[serde(default = "default_high_watermark")]
    pub high_watermark: f64,

    #[serde(default = "default_low_watermark")]
    pub low_watermark: f64,

    #[serde(default)]
    pub queue: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_concurrent_activities: default_max_concurrent_activities(),
            cron_tick_interval_ms: default_cron_tick_interval_ms(),
            high_watermark: default_high_watermark(),
            low_watermark: default_low_watermark(),
            queue: None,
        }
    }
}

impl SchedulerConfig {
    /// Load from environment variables prefixed `SAGAFLOW_SCHEDULER_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("SAGAFLOW_SCHEDULER_").from_env()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cron_tick_interval(&self) -> Duration {
        Duration::from_millis(self.cron_tick_interval_ms)
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrent_activities(mut self, max: usize) -> Self {
        self.max_concurrent_activities = max.max(1);
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size, 100);
        assert!(config.high_watermark > config.low_watermark);
    }

    #[test]
    fn builder_clamps_batch_size() {
        let config = SchedulerConfig::default().with_batch_size(0);
        assert_eq!(config.batch_size, 1);
    }
}
