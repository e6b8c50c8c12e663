//! Core types and error definitions for the Maestro orchestration engine.
//!
//! This crate provides the foundational types shared across all Maestro crates:
//! the unified error enum and the message shape exchanged with the external
//! completion service.
//!
//! # Main types
//!
//! - [`MaestroError`]: Unified error enum for all Maestro subsystems.
//! - [`MaestroResult`]: Convenience alias for `Result<T, MaestroError>`.
//! - [`ErrorKind`]: Failure taxonomy used for recovery policy and learning.
//! - [`Role`]: Message role (user, assistant, system).
//! - [`Message`]: A single message sent to the completion service.

/// Error enum and failure taxonomy.
pub mod error;
/// Completion-service message types.
pub mod message;

pub use error::{ErrorKind, MaestroError, MaestroResult};
pub use message::{Message, Role};
