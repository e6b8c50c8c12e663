pub mod openai;

use crate::stream::StreamEvent;
use async_trait::async_trait;
use maestro_core::{MaestroResult, Message};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Trait for completion-service backends.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `CompletionBackend` for your struct
/// 3. Add the variant to `LlmProvider` in `config.rs` if it needs config
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Non-streaming completion. Returns the assistant text.
    async fn complete(&self, messages: &[Message]) -> MaestroResult<String>;

    /// Streaming completion.
    ///
    /// Returns a receiver for stream events and a join handle that resolves
    /// to the final aggregated text. The default implementation runs
    /// [`complete`](Self::complete) and replays it as a single token.
    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> MaestroResult<(mpsc::Receiver<StreamEvent>, JoinHandle<MaestroResult<String>>)> {
        let text = self.complete(messages).await?;
        let (tx, rx) = mpsc::channel(2);
        let handle = tokio::spawn(async move {
            let _ = tx.send(StreamEvent::Token { text: text.clone() }).await;
            let _ = tx
                .send(StreamEvent::Done {
                    content: text.clone(),
                })
                .await;
            Ok(text)
        });
        Ok((rx, handle))
    }
}
