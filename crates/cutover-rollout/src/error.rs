//! Rollout error taxonomy and its mapping to process exit codes.

use std::time::Duration;

use cutover_core::{Color, ConfigError};
use cutover_orchestrator::OrchestratorError;
use cutover_state::StateError;
use thiserror::Error;

use crate::retry::{RetryError, Retryable};

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    /// A network call kept failing transiently until the retry budget ran out.
    #[error("{operation}: transient failure after {attempts} attempt(s): {message}")]
    TransientNetwork {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// The live selector did not hold the color the caller expected.
    #[error("conflict on {service}: expected {expected} active, found {}", describe(.actual))]
    Conflict {
        service: String,
        expected: Color,
        actual: Option<Color>,
    },

    #[error(
        "{environment} not ready: failed checks [{}]; {} still active",
        .failed_checks.join(", "),
        describe(.active)
    )]
    ReadinessFailure {
        environment: String,
        failed_checks: Vec<String>,
        active: Option<Color>,
    },

    /// The deployment did not reach its ready replica count in time.
    #[error("{deployment}: {ready}/{desired} replicas ready after {waited:?}")]
    DeployTimeout {
        deployment: String,
        ready: u32,
        desired: u32,
        waited: Duration,
    },

    /// Reverting traffic failed; an operator must fix the selector.
    #[error("irrecoverable switch on {service} ({} last seen active): {reason}", describe(.active))]
    IrrecoverableSwitch {
        service: String,
        active: Option<Color>,
        reason: String,
    },

    #[error("a rollout is already in progress for {service}")]
    RolloutInProgress { service: String },

    /// Post-switch supervision tripped and traffic went back to the old color.
    #[error("deployment failed on {service}: {reason}; traffic reverted to {reverted_to}")]
    DeploymentFailed {
        service: String,
        reason: String,
        reverted_to: Color,
    },

    #[error("cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("rollout lock: {0}")]
    Lock(String),

    #[error("orchestrator: {0}")]
    Orchestrator(OrchestratorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),
}

fn describe(color: &Option<Color>) -> &'static str {
    color.map(Color::as_str).unwrap_or("no color")
}

impl RolloutError {
    /// Exit code reported to the CI pipeline.
    pub fn exit_code(&self) -> i32 {
        match self {
            RolloutError::ReadinessFailure { .. } | RolloutError::DeployTimeout { .. } => 2,
            RolloutError::Conflict { .. } => 3,
            RolloutError::RolloutInProgress { .. } => 4,
            RolloutError::DeploymentFailed { .. } => 5,
            RolloutError::IrrecoverableSwitch { .. } => 6,
            RolloutError::TransientNetwork { .. } => 7,
            RolloutError::Cancelled { .. } => 8,
            RolloutError::Lock(_)
            | RolloutError::Orchestrator(_)
            | RolloutError::Config(_)
            | RolloutError::State(_) => 1,
        }
    }

    /// Classify an orchestrator failure from a single call.
    pub fn from_orchestrator(operation: &str, error: OrchestratorError) -> Self {
        if error.is_transient() {
            RolloutError::TransientNetwork {
                operation: operation.to_string(),
                attempts: 1,
                message: error.to_string(),
            }
        } else {
            RolloutError::Orchestrator(error)
        }
    }
}

impl Retryable for RolloutError {
    fn is_transient(&self) -> bool {
        matches!(self, RolloutError::TransientNetwork { .. })
    }
}

impl Retryable for OrchestratorError {
    fn is_transient(&self) -> bool {
        OrchestratorError::is_transient(self)
    }
}

impl From<RetryError<RolloutError>> for RolloutError {
    fn from(err: RetryError<RolloutError>) -> Self {
        match err.error {
            RolloutError::TransientNetwork {
                operation, message, ..
            } => RolloutError::TransientNetwork {
                operation,
                attempts: err.attempts,
                message,
            },
            other => other,
        }
    }
}

impl From<RetryError<OrchestratorError>> for RolloutError {
    fn from(err: RetryError<OrchestratorError>) -> Self {
        if err.error.is_transient() {
            RolloutError::TransientNetwork {
                operation: err.operation,
                attempts: err.attempts,
                message: err.error.to_string(),
            }
        } else {
            RolloutError::Orchestrator(err.error)
        }
    }
}
