//! Per-invocation context handed to every activity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A handle the caller keeps to request cancellation of a running activity.
#[derive(Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Context passed to an activity handler on every attempt.
#[derive(Clone)]
pub struct ActivityContext {
    pub workflow_id: String,
    pub activity_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl ActivityContext {
    pub fn new(workflow_id: impl Into<String>, activity_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            activity_id: activity_id.into(),
            attempt: 1,
            max_attempts: 1,
            timeout: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_attempt(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = attempt;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// A handle an external caller can use to cancel this activity.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Poll for cancellation on a fixed interval; handlers that do long,
    /// uninterruptible work should race this against their own future.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_cancelled() {
        let ctx = ActivityContext::new("wf1", "a1");
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn cancellation_handle_propagates() {
        let ctx = ActivityContext::new("wf1", "a1");
        let handle = ctx.cancellation_handle();
        handle.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn last_attempt_detection() {
        let ctx = ActivityContext::new("wf1", "a1").with_attempt(3, 3);
        assert!(ctx.is_last_attempt());

        let ctx = ActivityContext::new("wf1", "a1").with_attempt(1, 3);
        assert!(!ctx.is_last_attempt());
    }
}
