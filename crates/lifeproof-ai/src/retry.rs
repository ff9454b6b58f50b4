//! Exponential-backoff retry around model invocation.

use lifeproof_core::RetryPolicy;
use tracing::warn;

use crate::client::{InvocationError, ModelClient, ModelRequest};
use crate::error::ClassifyError;

/// Invoke the model, retrying transient failures per `policy`.
///
/// Non-retryable errors return immediately as [`ClassifyError::NonRetryable`].
pub async fn invoke_with_retry(
    client: &dyn ModelClient,
    request: &ModelRequest,
    policy: &RetryPolicy,
) -> Result<String, ClassifyError> {
    let mut attempt = 1;
    loop {
        match client.invoke(request).await {
            Ok(text) => return Ok(text),
            Err(InvocationError::NonRetryable(msg)) => {
                return Err(ClassifyError::NonRetryable(msg));
            }
            Err(InvocationError::Retryable(msg)) if attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    model = %request.model,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %msg,
                    "transient model error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(InvocationError::Retryable(msg)) => {
                return Err(ClassifyError::RetriesExhausted {
                    attempts: attempt,
                    last: msg,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays a fixed script of responses, then repeats the last one.
    struct Scripted {
        script: Mutex<Vec<Result<String, InvocationError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<String, InvocationError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelClient for Scripted {
        async fn invoke(&self, _request: &ModelRequest) -> Result<String, InvocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop().unwrap()
            } else {
                script[0].clone()
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            backoff_rate: 2.0,
            max_backoff_ms: 5,
        }
    }

    fn request() -> ModelRequest {
        ModelRequest {
            model: "fast".into(),
            prompt: "p".into(),
            max_tokens: 10,
            temperature: 0.0,
        }
    }

    fn throttled() -> Result<String, InvocationError> {
        Err(InvocationError::Retryable("ThrottlingException".into()))
    }

    #[tokio::test]
    async fn succeeds_after_two_throttles() {
        let client = Scripted::new(vec![throttled(), throttled(), Ok("{}".into())]);
        let out = invoke_with_retry(&client, &request(), &fast_policy(5))
            .await
            .unwrap();
        assert_eq!(out, "{}");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_at_attempt_ceiling() {
        let client = Scripted::new(vec![throttled()]);
        let err = invoke_with_retry(&client, &request(), &fast_policy(3))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ClassifyError::RetriesExhausted {
                attempts: 3,
                last: "ThrottlingException".into()
            }
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        let client = Scripted::new(vec![Err(InvocationError::NonRetryable(
            "AccessDeniedException".into(),
        ))]);
        let err = invoke_with_retry(&client, &request(), &fast_policy(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::NonRetryable(_)));
        assert_eq!(err.kind(), "NonRetryableInvocationError");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_policy_never_sleeps() {
        let client = Scripted::new(vec![throttled(), Ok("late".into())]);
        let err = invoke_with_retry(&client, &request(), &fast_policy(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::RetriesExhausted { attempts: 1, .. }));
    }
}
