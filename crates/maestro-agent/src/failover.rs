use crate::backends::CompletionBackend;
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult, Message};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Configures retry behaviour for failover across completion backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries per backend before moving to the next one.
    pub max_retries: u32,
    /// Delay unit in milliseconds; attempt `n` waits `n * backoff_base_ms`.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
        }
    }
}

/// Linear backoff: the delay grows with the attempt number, capped at
/// `backoff_max_ms`. `attempt` is 1-based.
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    policy
        .backoff_base_ms
        .saturating_mul(u64::from(attempt))
        .min(policy.backoff_max_ms)
}

/// A `CompletionBackend` that wraps several backends and fails over between them.
///
/// For each request it tries backends in order. Within each backend it retries
/// up to `max_retries` times for transient errors. A non-transient error moves
/// straight to the next backend. If every backend fails, the last error is
/// returned.
pub struct FailoverBackend {
    backends: Vec<Box<dyn CompletionBackend>>,
    policy: RetryPolicy,
}

impl FailoverBackend {
    /// Create a failover backend. Returns a config error if `backends` is empty.
    pub fn new(
        backends: Vec<Box<dyn CompletionBackend>>,
        policy: RetryPolicy,
    ) -> MaestroResult<Self> {
        if backends.is_empty() {
            return Err(MaestroError::Config(
                "FailoverBackend requires at least one backend".into(),
            ));
        }
        Ok(Self { backends, policy })
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }
}

#[async_trait]
impl CompletionBackend for FailoverBackend {
    async fn complete(&self, messages: &[Message]) -> MaestroResult<String> {
        let mut last_err: Option<MaestroError> = None;

        for (backend_idx, backend) in self.backends.iter().enumerate() {
            for attempt in 0..=self.policy.max_retries {
                if attempt > 0 {
                    let delay = compute_backoff(&self.policy, attempt);
                    info!(
                        backend = backend_idx,
                        attempt,
                        delay_ms = delay,
                        "Retrying completion after backoff"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                match backend.complete(messages).await {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        let transient = e.is_transient();
                        warn!(backend = backend_idx, attempt, error = %e, transient, "Completion failed");
                        last_err = Some(e);
                        if !transient {
                            break; // move to next backend
                        }
                    }
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| MaestroError::Transient("All failover backends exhausted".into())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// A mock backend that returns a sequence of results.
    struct MockBackend {
        results: tokio::sync::Mutex<Vec<MaestroResult<String>>>,
        calls: Arc<AtomicU32>,
    }

    impl MockBackend {
        fn new(results: Vec<MaestroResult<String>>) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    results: tokio::sync::Mutex::new(results),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl CompletionBackend for MockBackend {
        async fn complete(&self, _messages: &[Message]) -> MaestroResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Err(MaestroError::Http("MockBackend: no more results".into()))
            } else {
                results.remove(0)
            }
        }
    }

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_try() {
        let (backend, calls) = MockBackend::new(vec![
            Err(MaestroError::Http("429 Too Many Requests".into())),
            Ok("ok".into()),
        ]);
        let failover = FailoverBackend::new(vec![Box::new(backend)], instant_policy()).unwrap();

        assert_eq!(failover.complete(&[]).await.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_backends_fail_returns_last_error() {
        let (b1, _) = MockBackend::new(vec![
            Err(MaestroError::Http("500 Internal Server Error".into())),
            Err(MaestroError::Http("500 Internal Server Error".into())),
            Err(MaestroError::Http("500 Internal Server Error".into())),
            Err(MaestroError::Http("500 Internal Server Error".into())),
        ]);
        let (b2, _) = MockBackend::new(vec![
            Err(MaestroError::Http("503 Service Unavailable".into())),
            Err(MaestroError::Http("503 Service Unavailable".into())),
            Err(MaestroError::Http("503 Service Unavailable".into())),
            Err(MaestroError::Http("503 Service Unavailable".into())),
        ]);
        let failover =
            FailoverBackend::new(vec![Box::new(b1), Box::new(b2)], instant_policy()).unwrap();

        let err_msg = failover.complete(&[]).await.unwrap_err().to_string();
        assert!(err_msg.contains("503"), "Expected last error (503), got: {err_msg}");
    }

    #[tokio::test]
    async fn non_retryable_moves_to_next_backend() {
        let (b1, calls1) = MockBackend::new(vec![
            Err(MaestroError::Http("400 Bad Request".into())),
            Ok("should not reach".into()),
        ]);
        let (b2, _) = MockBackend::new(vec![Ok("fallback ok".into())]);
        let failover =
            FailoverBackend::new(vec![Box::new(b1), Box::new(b2)], instant_policy()).unwrap();

        assert_eq!(failover.complete(&[]).await.unwrap(), "fallback ok");
        assert_eq!(calls1.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 2_000,
        };
        assert_eq!(compute_backoff(&policy, 1), 500);
        assert_eq!(compute_backoff(&policy, 2), 1000);
        assert_eq!(compute_backoff(&policy, 3), 1500);
        assert_eq!(compute_backoff(&policy, 4), 2000);
        assert_eq!(compute_backoff(&policy, 9), 2000);
    }

    #[test]
    fn empty_backend_list_is_config_error() {
        let result = FailoverBackend::new(Vec::new(), RetryPolicy::default());
        assert!(matches!(result, Err(MaestroError::Config(_))));
    }
}
