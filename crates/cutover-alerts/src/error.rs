//! Alert source error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertError {
    #[error("alert backend unreachable: {0}")]
    Transport(String),

    #[error("alert client setup failed: {0}")]
    Setup(String),

    #[error("alert backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed alert payload: {0}")]
    Decode(String),

    /// Injected by [`MemoryAlertSource`](crate::MemoryAlertSource).
    #[error("alert source unavailable: {0}")]
    Unavailable(String),
}

pub type AlertResult<T> = Result<T, AlertError>;
