//! Canonical middleware: Logging, Recovery, Timeout.
//!
//! A middleware rewrites one handler into another with the same signature.
//! `ActivityRegistry::with_middleware(&[m1, m2, m3])` folds the chain as
//! `m1(m2(m3(h)))`, `m1` outermost, so the order given is the order the
//! concerns apply in.

use std::sync::Arc;
use std::time::Instant;

use super::definition::ActivityError;
use super::registry::BoxActivityHandler;

pub type Middleware = Arc<dyn Fn(BoxActivityHandler) -> BoxActivityHandler + Send + Sync>;

/// Emits a start/complete-or-fail `tracing` span around every invocation.
pub fn logging_middleware() -> Middleware {
    Arc::new(|inner: BoxActivityHandler| -> BoxActivityHandler {
        Arc::new(move |ctx, payload| {
            let inner = inner.clone();
            Box::pin(async move {
                let activity_id = ctx.activity_id.clone();
                let workflow_id = ctx.workflow_id.clone();
                let attempt = ctx.attempt;
                tracing::info!(
                    workflow_id = %workflow_id,
                    activity_id = %activity_id,
                    attempt,
                    "activity starting"
                );
                let start = Instant::now();
                let result = inner(ctx, payload).await;
                let elapsed = start.elapsed();
                match &result {
                    Ok(_) => tracing::info!(
                        workflow_id = %workflow_id,
                        activity_id = %activity_id,
                        attempt,
                        duration_ms = elapsed.as_millis() as u64,
                        "activity completed"
                    ),
                    Err(err) => tracing::warn!(
                        workflow_id = %workflow_id,
                        activity_id = %activity_id,
                        attempt,
                        duration_ms = elapsed.as_millis() as u64,
                        error = %err,
                        "activity failed"
                    ),
                }
                result
            })
        })
    })
}

/// Converts an uncaught panic inside the handler into a retryable
/// `ActivityError` instead of propagating the unwind. Runs the handler on
/// its own spawned task so `JoinHandle::await` surfaces the panic as a
/// `JoinError` rather than poisoning the caller's stack.
pub fn recovery_middleware() -> Middleware {
    Arc::new(|inner: BoxActivityHandler| -> BoxActivityHandler {
        Arc::new(move |ctx, payload| {
            let inner = inner.clone();
            Box::pin(async move {
                let activity_id = ctx.activity_id.clone();
                match tokio::spawn(async move { inner(ctx, payload).await }).await {
                    Ok(result) => result,
                    Err(join_err) => {
                        tracing::error!(activity_id = %activity_id, error = %join_err, "activity panicked");
                        Err(ActivityError::retryable(format!("fault: {join_err}")))
                    }
                }
            })
        })
    })
}

/// Fails with a timeout error if `ctx.timeout` elapses before the handler
/// returns. A context with no timeout set runs unbounded.
pub fn timeout_middleware() -> Middleware {
    Arc::new(|inner: BoxActivityHandler| -> BoxActivityHandler {
        Arc::new(move |ctx, payload| {
            let inner = inner.clone();
            Box::pin(async move {
                match ctx.timeout {
                    Some(duration) => match tokio::time::timeout(duration, inner(ctx, payload)).await {
                        Ok(result) => result,
                        Err(_) => Err(ActivityError::retryable("activity timed out")
                            .with_type("TIMEOUT")),
                    },
                    None => inner(ctx, payload).await,
                }
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityContext;
    use std::time::Duration;

    fn ok_handler() -> BoxActivityHandler {
        Arc::new(|_ctx, payload| Box::pin(async move { Ok(payload) }))
    }

    fn panicking_handler() -> BoxActivityHandler {
        Arc::new(|_ctx, _payload| Box::pin(async move { panic!("boom") }))
    }

    fn slow_handler() -> BoxActivityHandler {
        Arc::new(|_ctx, _payload| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(serde_json::json!("done"))
            })
        })
    }

    #[tokio::test]
    async fn logging_middleware_passes_through_success() {
        let wrapped = logging_middleware()(ok_handler());
        let result = wrapped(ActivityContext::new("wf", "a"), serde_json::json!(1))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(1));
    }

    #[tokio::test]
    async fn recovery_middleware_converts_panic_to_error() {
        let wrapped = recovery_middleware()(panicking_handler());
        let err = wrapped(ActivityContext::new("wf", "a"), serde_json::json!(null))
            .await
            .unwrap_err();
        assert!(err.retryable);
        assert!(err.message.contains("fault"));
    }

    #[tokio::test]
    async fn timeout_middleware_fails_when_deadline_elapses() {
        let ctx = ActivityContext::new("wf", "a").with_timeout(Duration::from_millis(5));
        let wrapped = timeout_middleware()(slow_handler());
        let err = wrapped(ctx, serde_json::json!(null)).await.unwrap_err();
        assert_eq!(err.error_type.as_deref(), Some("TIMEOUT"));
    }

    #[tokio::test]
    async fn timeout_middleware_allows_fast_handler() {
        let ctx = ActivityContext::new("wf", "a").with_timeout(Duration::from_secs(5));
        let wrapped = timeout_middleware()(slow_handler());
        let result = wrapped(ctx, serde_json::json!(null)).await.unwrap();
        assert_eq!(result, serde_json::json!("done"));
    }
}
