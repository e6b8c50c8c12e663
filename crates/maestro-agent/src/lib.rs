//! Completion-service access for Maestro.
//!
//! The engine treats the text-completion service as a fallible black box:
//! absence, timeouts and malformed answers all look the same to callers.
//! This crate provides the pieces that make that true.
//!
//! - [`CompletionBackend`]: provider abstraction (plain and streaming).
//! - [`OpenAiBackend`]: OpenAI-compatible HTTP backend.
//! - [`FailoverBackend`]: bounded retry with linear backoff across backends.
//! - [`CompletionClient`]: timeout-bounded client used by the orchestrator.
//! - [`StreamEvent`] and [`StreamCallbacks`]: token streaming.

/// Provider backends.
pub mod backends;
/// Model and provider configuration.
pub mod config;
/// Retry and failover across backends.
pub mod failover;
/// Timeout-bounded completion client.
pub mod llm;
/// Streaming events and callbacks.
pub mod stream;

pub use backends::openai::OpenAiBackend;
pub use backends::CompletionBackend;
pub use config::{LlmProvider, ModelConfig};
pub use failover::{FailoverBackend, RetryPolicy};
pub use llm::CompletionClient;
pub use stream::{StreamCallbacks, StreamEvent};
