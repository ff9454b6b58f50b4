//! The model-invocation capability the worker depends on.

use async_trait::async_trait;
use thiserror::Error;

/// One prompt sent to one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvocationError {
    /// Throttling, rate limiting, overload, transient network failure.
    #[error("transient model error: {0}")]
    Retryable(String),

    /// Missing model access, bad credentials, malformed request.
    #[error("model access or configuration error: {0}")]
    NonRetryable(String),
}

impl InvocationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Invoke a hosted model with a prompt and return its raw text output.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, InvocationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl ModelClient for Echo {
        async fn invoke(&self, request: &ModelRequest) -> Result<String, InvocationError> {
            Ok(request.prompt.clone())
        }
    }

    #[tokio::test]
    async fn usable_as_trait_object() {
        let client: Arc<dyn ModelClient> = Arc::new(Echo);
        let out = client
            .invoke(&ModelRequest {
                model: "m".into(),
                prompt: "hello".into(),
                max_tokens: 1,
                temperature: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(InvocationError::Retryable("429".into()).is_retryable());
        assert!(!InvocationError::NonRetryable("403".into()).is_retryable());
    }
}
