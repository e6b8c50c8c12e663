use crate::backends::openai::OpenAiBackend;
use crate::backends::CompletionBackend;
use crate::config::ModelConfig;
use crate::failover::FailoverBackend;
use crate::stream::StreamCallbacks;
use maestro_core::{MaestroError, MaestroResult, Message};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Completion client with a per-call timeout.
///
/// Every call is raced against a timer. A call that loses the race is
/// abandoned and reported as [`MaestroError::Timeout`]; its eventual result
/// is discarded. Cloning is cheap.
#[derive(Clone)]
pub struct CompletionClient {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl CompletionClient {
    /// Build a client from model config. Fallback models, if any, are wrapped
    /// in a [`FailoverBackend`].
    pub fn new(config: ModelConfig, timeout: Duration) -> MaestroResult<Self> {
        let policy = config.retry_policy.clone().unwrap_or_default();
        let mut backends: Vec<Box<dyn CompletionBackend>> = Vec::new();
        for fallback in &config.fallback_models {
            backends.push(Box::new(OpenAiBackend::new(fallback.clone())));
        }
        backends.insert(0, Box::new(OpenAiBackend::new(config)));
        let backend = FailoverBackend::new(backends, policy)?;
        Ok(Self {
            backend: Arc::new(backend),
            timeout,
        })
    }

    /// Create from a pre-built backend (for custom providers and tests).
    pub fn from_backend(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send an ordered message list and wait for the text result.
    pub async fn complete(&self, messages: &[Message]) -> MaestroResult<String> {
        match tokio::time::timeout(self.timeout, self.backend.complete(messages)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Completion call timed out");
                Err(MaestroError::Timeout(format!(
                    "completion exceeded {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Convenience wrapper for a system prompt plus one user message.
    pub async fn ask(&self, system: &str, user: &str) -> MaestroResult<String> {
        self.complete(&[Message::system(system), Message::user(user)])
            .await
    }

    /// Stream a completion through callbacks, bounded by the same timeout.
    pub async fn stream(
        &self,
        messages: &[Message],
        callbacks: StreamCallbacks,
    ) -> MaestroResult<String> {
        let fut = async move {
            let (rx, handle) = self.backend.complete_stream(messages).await?;
            let streamed = callbacks.drive(rx).await;
            let joined = handle
                .await
                .map_err(|e| MaestroError::Transient(format!("stream task failed: {e}")))?;
            match (streamed, joined) {
                (Some(text), Ok(_)) => Ok(text),
                (_, Err(e)) => Err(e),
                (None, Ok(_)) => Err(MaestroError::Transient("stream ended without result".into())),
            }
        };
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Streaming completion abandoned after timeout");
                Err(MaestroError::Timeout(format!(
                    "streaming completion exceeded {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct SlowBackend;

    #[async_trait]
    impl CompletionBackend for SlowBackend {
        async fn complete(&self, _messages: &[Message]) -> MaestroResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct EchoBackend;

    #[async_trait]
    impl CompletionBackend for EchoBackend {
        async fn complete(&self, messages: &[Message]) -> MaestroResult<String> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let client = CompletionClient::from_backend(Arc::new(SlowBackend), Duration::from_millis(20));
        let err = client.ask("sys", "hello").await.unwrap_err();
        assert!(matches!(err, MaestroError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_ask_passes_messages() {
        let client = CompletionClient::from_backend(Arc::new(EchoBackend), Duration::from_secs(1));
        assert_eq!(client.ask("sys", "ping").await.unwrap(), "ping");
    }

    #[tokio::test]
    async fn test_default_stream_replays_completion() {
        let client = CompletionClient::from_backend(Arc::new(EchoBackend), Duration::from_secs(1));
        let text = client
            .stream(&[Message::user("streamed")], StreamCallbacks::new())
            .await
            .unwrap();
        assert_eq!(text, "streamed");
    }
}
