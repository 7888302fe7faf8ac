//! The `Activity` trait: typed ergonomics over the registry's opaque payloads.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::context::ActivityContext;

/// Error returned by an activity handler.
///
/// Carries its own retry classification so the engine and scheduler never
/// have to guess whether a failure is worth retrying.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ActivityError {
    pub message: String,
    pub error_type: Option<String>,
    pub retryable: bool,
}

impl ActivityError {
    /// A retryable (transient) failure.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
        }
    }

    /// A terminal failure; the caller must not retry it.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.message = format!("{}: {}", self.message, details.into());
        self
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        ActivityError::retryable(err.to_string())
    }
}

/// A strongly-typed activity implementation.
///
/// The registry (`ActivityRegistry::register_typed`) erases this to the
/// opaque `(ActivityContext, serde_json::Value) -> Result<serde_json::Value,
/// ActivityError>` shape it actually stores; the registry itself never
/// inspects `Input`/`Output`; only the handler decodes its own payload.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Registry key this activity binds to.
    const TYPE: &'static str;

    type Input: Serialize + DeserializeOwned + Send;
    type Output: Serialize + DeserializeOwned + Send;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_message() {
        let err = ActivityError::non_retryable("bad input");
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn with_type_sets_error_type() {
        let err = ActivityError::non_retryable("bad input").with_type("VALIDATION");
        assert_eq!(err.error_type, Some("VALIDATION".to_string()));
    }

    #[test]
    fn retryable_flag_is_set_by_constructor() {
        assert!(ActivityError::retryable("timeout").retryable);
        assert!(!ActivityError::non_retryable("bad input").retryable);
    }
}
