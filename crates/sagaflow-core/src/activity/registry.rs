//! Name-to-handler binding over opaque JSON payloads.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::error::ErrorKind;

use super::context::ActivityContext;
use super::definition::{Activity, ActivityError};
use super::middleware::Middleware;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The type-erased shape every binding in the registry actually stores.
/// The registry never looks inside the `serde_json::Value` payload or
/// result; only the bound handler decodes them.
pub type BoxActivityHandler = Arc<
    dyn Fn(ActivityContext, serde_json::Value) -> BoxFuture<Result<serde_json::Value, ActivityError>>
        + Send
        + Sync,
>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no activity registered for type '{0}'")]
    NotFound(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

/// Reserved namespace for internal-system activities. Registering under it
/// is allowed; it is only logged at a different level so operators can
/// audit what got bound there.
pub const SYSTEM_PREFIX: &str = "system:";

#[derive(Default)]
pub struct ActivityRegistry {
    handlers: RwLock<HashMap<String, BoxActivityHandler>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type-erased handler. Overwrites any prior binding for
    /// `name`; in-flight invocations of the old handler still complete.
    pub fn register(&self, name: impl Into<String>, handler: BoxActivityHandler) {
        let name = name.into();
        if name.starts_with(SYSTEM_PREFIX) {
            tracing::debug!(activity.name = %name, "registering internal system activity");
        } else {
            tracing::info!(activity.name = %name, "registering activity");
        }
        self.handlers.write().insert(name, handler);
    }

    /// Register a strongly-typed [`Activity`], erasing it to the registry's
    /// opaque payload shape.
    pub fn register_typed<A: Activity>(&self, activity: A) {
        let activity = Arc::new(activity);
        let handler: BoxActivityHandler = Arc::new(move |ctx, payload| {
            let activity = activity.clone();
            Box::pin(async move {
                let input: A::Input = serde_json::from_value(payload)
                    .map_err(|e| ActivityError::non_retryable(format!("decode input: {e}")))?;
                let output = activity.execute(&ctx, input).await?;
                serde_json::to_value(output)
                    .map_err(|e| ActivityError::non_retryable(format!("encode output: {e}")))
            })
        });
        self.register(A::TYPE, handler);
    }

    /// Like [`register_typed`](Self::register_typed), but binds under
    /// `name` instead of `A::TYPE`, useful when one implementation backs
    /// several registry entries (e.g. the closed rollback-kind set).
    pub fn register_typed_as<A: Activity>(&self, name: impl Into<String>, activity: A) {
        let activity = Arc::new(activity);
        let handler: BoxActivityHandler = Arc::new(move |ctx, payload| {
            let activity = activity.clone();
            Box::pin(async move {
                let input: A::Input = serde_json::from_value(payload)
                    .map_err(|e| ActivityError::non_retryable(format!("decode input: {e}")))?;
                let output = activity.execute(&ctx, input).await?;
                serde_json::to_value(output)
                    .map_err(|e| ActivityError::non_retryable(format!("encode output: {e}")))
            })
        });
        self.register(name, handler);
    }

    pub fn unregister(&self, name: &str) {
        self.handlers.write().remove(name);
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<BoxActivityHandler, RegistryError> {
        self.handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Invoke the named handler directly.
    pub async fn invoke(
        &self,
        name: &str,
        ctx: ActivityContext,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        let handler = self
            .get(name)
            .map_err(|e| ActivityError::non_retryable(e.to_string()))?;
        handler(ctx, payload).await
    }

    /// Rewrite every currently-registered binding as `m1(m2(...mn(h)))`,
    /// `m1` outermost. Takes the write lock once for the whole fold so a
    /// concurrent reader never observes a partially-rewritten registry.
    pub fn with_middleware(&self, middlewares: &[Middleware]) {
        let mut handlers = self.handlers.write();
        for handler in handlers.values_mut() {
            let mut wrapped = handler.clone();
            for m in middlewares.iter().rev() {
                wrapped = m(wrapped);
            }
            *handler = wrapped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Activity for Echo {
        const TYPE: &'static str = "echo";
        type Input = String;
        type Output = String;

        async fn execute(
            &self,
            _ctx: &ActivityContext,
            input: Self::Input,
        ) -> Result<Self::Output, ActivityError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn register_and_invoke_typed_activity() {
        let registry = ActivityRegistry::new();
        registry.register_typed(Echo);

        assert!(registry.has("echo"));
        let result = registry
            .invoke(
                "echo",
                ActivityContext::new("wf1", "a1"),
                serde_json::json!("hello"),
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("hello"));
    }

    #[tokio::test]
    async fn invoking_unknown_activity_fails() {
        let registry = ActivityRegistry::new();
        let err = registry
            .invoke("missing", ActivityContext::new("wf1", "a1"), serde_json::json!(null))
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn reregistering_overwrites() {
        let registry = ActivityRegistry::new();
        registry.register_typed(Echo);
        registry.register_typed(Echo);
        assert_eq!(registry.list(), vec!["echo".to_string()]);
    }

    #[test]
    fn unregister_removes_binding() {
        let registry = ActivityRegistry::new();
        registry.register_typed(Echo);
        registry.unregister("echo");
        assert!(!registry.has("echo"));
    }
}
