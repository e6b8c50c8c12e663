use super::CompletionBackend;
use crate::config::{LlmProvider, ModelConfig};
use crate::stream::StreamEvent;
use async_trait::async_trait;
use futures_util::StreamExt;
use maestro_core::{MaestroError, MaestroResult, Message};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// OpenAI-compatible API backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn build_body(&self, messages: &[Message], stream: bool) -> serde_json::Value {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": api_messages,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        let request = if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        };

        // OpenRouter requires extra headers
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request
                .header("HTTP-Referer", "https://github.com/fboiero/Maestro")
                .header("X-Title", "Maestro")
        } else {
            request
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url())
    }
}

fn transport_error(e: reqwest::Error) -> MaestroError {
    if e.is_timeout() || e.is_connect() {
        MaestroError::Transient(e.to_string())
    } else {
        MaestroError::Http(e.to_string())
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, messages: &[Message]) -> MaestroResult<String> {
        let request = self.add_provider_headers(self.http.post(self.url()));

        let resp = request
            .json(&self.build_body(messages, false))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp.json().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(MaestroError::Http(format!(
                "Completion API error {status}: {resp_body}"
            )));
        }

        parse_openai_response(&resp_body)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> MaestroResult<(mpsc::Receiver<StreamEvent>, JoinHandle<MaestroResult<String>>)> {
        let request = self.add_provider_headers(self.http.post(self.url()));

        let resp = request
            .json(&self.build_body(messages, true))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(MaestroError::Http(format!(
                "Completion API error {status}: {error_body}"
            )));
        }

        let (tx, rx) = mpsc::channel::<StreamEvent>(256);
        let byte_stream = resp.bytes_stream();

        let handle = tokio::spawn(async move {
            let mut stream = byte_stream;
            let mut buffer = String::new();
            let mut full_text = String::new();

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let message = format!("Stream read error: {e}");
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: message.clone(),
                            })
                            .await;
                        return Err(MaestroError::Transient(message));
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if let Some(content) = event["choices"][0]["delta"]["content"].as_str() {
                        if !content.is_empty() {
                            full_text.push_str(content);
                            let _ = tx
                                .send(StreamEvent::Token {
                                    text: content.to_string(),
                                })
                                .await;
                        }
                    }
                }
            }

            if full_text.trim().is_empty() {
                let message = "empty completion stream".to_string();
                let _ = tx
                    .send(StreamEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                return Err(MaestroError::Http(message));
            }

            let _ = tx
                .send(StreamEvent::Done {
                    content: full_text.clone(),
                })
                .await;
            Ok(full_text)
        });

        Ok((rx, handle))
    }
}

/// Extract the assistant text from a chat-completions response body.
///
/// A response without a usable `content` string is malformed.
pub fn parse_openai_response(body: &serde_json::Value) -> MaestroResult<String> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| MaestroError::Http(format!("Malformed completion response: {body}")))?;
    if content.trim().is_empty() {
        return Err(MaestroError::Http("Empty completion response".to_string()));
    }
    Ok(content.to_string())
}
