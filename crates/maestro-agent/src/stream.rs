use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a streaming completion.
///
/// These map one-to-one onto the token / complete / error callbacks a
/// streaming consumer registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of text content from the model.
    Token { text: String },

    /// The stream has finished; `content` is the full aggregated text.
    Done { content: String },

    /// An error occurred during streaming.
    Error { message: String },
}

type TokenFn = Box<dyn FnMut(&str) + Send>;
type CompleteFn = Box<dyn FnOnce(&str) + Send>;
type ErrorFn = Box<dyn FnOnce(&str) + Send>;

/// Callback-style consumer for a [`StreamEvent`] receiver.
///
/// Exactly one of `on_complete` / `on_error` fires per stream. A stream that
/// closes without a terminal event counts as an error.
#[derive(Default)]
pub struct StreamCallbacks {
    on_token: Option<TokenFn>,
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_token(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_token = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Drain the receiver, dispatching each event. Returns the completed text,
    /// or `None` if the stream ended in an error.
    pub async fn drive(mut self, mut rx: mpsc::Receiver<StreamEvent>) -> Option<String> {
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token { text } => {
                    if let Some(f) = self.on_token.as_mut() {
                        f(&text);
                    }
                }
                StreamEvent::Done { content } => {
                    if let Some(f) = self.on_complete.take() {
                        f(&content);
                    }
                    return Some(content);
                }
                StreamEvent::Error { message } => {
                    if let Some(f) = self.on_error.take() {
                        f(&message);
                    }
                    return None;
                }
            }
        }
        if let Some(f) = self.on_error.take() {
            f("stream closed before completion");
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_drive_collects_tokens_and_completion() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::Token { text: "Hel".into() }).await.unwrap();
        tx.send(StreamEvent::Token { text: "lo".into() }).await.unwrap();
        tx.send(StreamEvent::Done {
            content: "Hello".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let tokens = Arc::new(Mutex::new(String::new()));
        let sink = tokens.clone();
        let result = StreamCallbacks::new()
            .on_token(move |t| sink.lock().unwrap().push_str(t))
            .drive(rx)
            .await;

        assert_eq!(result.as_deref(), Some("Hello"));
        assert_eq!(tokens.lock().unwrap().as_str(), "Hello");
    }

    #[tokio::test]
    async fn test_closed_stream_reports_error() {
        let (tx, rx) = mpsc::channel::<StreamEvent>(1);
        drop(tx);
        let errored = Arc::new(Mutex::new(false));
        let flag = errored.clone();
        let result = StreamCallbacks::new()
            .on_error(move |_| *flag.lock().unwrap() = true)
            .drive(rx)
            .await;
        assert!(result.is_none());
        assert!(*errored.lock().unwrap());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_string(&StreamEvent::Token { text: "a".into() }).unwrap();
        assert!(json.contains("\"type\":\"token\""));
    }
}
