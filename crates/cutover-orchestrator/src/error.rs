//! Orchestrator error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// Connecting to or talking with the API failed before a response.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("api call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The server rejected a conditional update because its precondition
    /// no longer held.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("selector {key:?} holds unknown value {value:?}")]
    UnknownSelector { key: String, value: String },

    /// No usable cluster configuration (kubeconfig, service account, URL).
    #[error("kubernetes client setup failed: {0}")]
    Setup(String),
}

impl OrchestratorError {
    /// Whether the same call could succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::Transport(_) | OrchestratorError::Timeout(_) => true,
            OrchestratorError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
