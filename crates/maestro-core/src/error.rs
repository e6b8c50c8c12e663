use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Top-level error type for the Maestro engine.
///
/// Each variant corresponds either to a subsystem or to one row of the
/// failure taxonomy (see [`ErrorKind`]).
#[derive(Error, Debug)]
pub enum MaestroError {
    /// A network or I/O hiccup on an external call that is worth retrying.
    #[error("Transient error: {0}")]
    Transient(String),

    /// An outbound HTTP request failed (status text is kept in the message).
    #[error("HTTP error: {0}")]
    Http(String),

    /// An operation lost its race against a timer.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A task output scored below the validation threshold.
    #[error("Validation failure: {0}")]
    Validation(String),

    /// The planner output was unusable (unparsable, empty, unavailable).
    #[error("Decomposition failure: {0}")]
    Decomposition(String),

    /// No agent could take the work.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A task failed after retries, reassignment and alternatives.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The orchestration run as a whole failed.
    #[error("Plan failure: {0}")]
    Plan(String),

    /// The run was cancelled cooperatively.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An internal orchestrator invariant was violated.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure taxonomy. Each kind has a fixed recovery policy in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network/timeout on an external call: retry with linear backoff.
    TransientIo,
    /// Output below threshold: self-heal.
    ValidationFailure,
    /// Planner output unusable: heuristic decomposition.
    DecompositionFailure,
    /// No idle capable agent: soft reassignment.
    ResourceExhaustion,
    /// Retries and alternatives exhausted: task failed.
    FatalTaskFailure,
    /// Uncaught error during orchestration.
    PlanFailure,
    /// Anything else (config, cancellation, serialization).
    Other,
}

impl MaestroError {
    /// Classify this error into the failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MaestroError::Transient(_) | MaestroError::Timeout(_) | MaestroError::Io(_) => {
                ErrorKind::TransientIo
            }
            MaestroError::Http(_) if self.is_transient() => ErrorKind::TransientIo,
            MaestroError::Validation(_) => ErrorKind::ValidationFailure,
            MaestroError::Decomposition(_) => ErrorKind::DecompositionFailure,
            MaestroError::ResourceExhausted(_) => ErrorKind::ResourceExhaustion,
            MaestroError::TaskFailed(_) => ErrorKind::FatalTaskFailure,
            MaestroError::Plan(_) => ErrorKind::PlanFailure,
            _ => ErrorKind::Other,
        }
    }

    /// Whether this error is transient and worth retrying.
    ///
    /// Timeouts, transport failures, rate limits (429) and server errors (5xx)
    /// are retryable. Client errors like 400 are not.
    pub fn is_transient(&self) -> bool {
        match self {
            MaestroError::Transient(_) | MaestroError::Timeout(_) | MaestroError::Io(_) => true,
            MaestroError::Http(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("400") {
                    return false;
                }
                lower.contains("429")
                    || lower.contains("timeout")
                    || lower.contains("timed out")
                    || lower.contains("connection")
                    || lower.contains("500")
                    || lower.contains("502")
                    || lower.contains("503")
                    || lower.contains("504")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MaestroError::Transient("reset".into()).is_transient());
        assert!(MaestroError::Timeout("completion".into()).is_transient());
        assert!(MaestroError::Http("429 Too Many Requests".into()).is_transient());
        assert!(MaestroError::Http("503 Service Unavailable".into()).is_transient());
        assert!(!MaestroError::Http("400 Bad Request".into()).is_transient());
        assert!(!MaestroError::Validation("short".into()).is_transient());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            MaestroError::Timeout("x".into()).kind(),
            ErrorKind::TransientIo
        );
        assert_eq!(
            MaestroError::Http("502 Bad Gateway".into()).kind(),
            ErrorKind::TransientIo
        );
        assert_eq!(MaestroError::Http("404".into()).kind(), ErrorKind::Other);
        assert_eq!(
            MaestroError::Decomposition("empty".into()).kind(),
            ErrorKind::DecompositionFailure
        );
        assert_eq!(
            MaestroError::TaskFailed("x".into()).kind(),
            ErrorKind::FatalTaskFailure
        );
    }

    #[test]
    fn test_error_display() {
        let err = MaestroError::Plan("no phases".into());
        assert_eq!(err.to_string(), "Plan failure: no phases");
    }
}
