//! Error types for the audit store.

use thiserror::Error;

/// Result type alias for audit store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during audit store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("audit store: failed to open database: {0}")]
    Open(String),

    #[error("audit store: transaction error: {0}")]
    Transaction(String),

    #[error("audit store: table error: {0}")]
    Table(String),

    #[error("audit store: read error: {0}")]
    Read(String),

    #[error("audit store: write error: {0}")]
    Write(String),

    #[error("audit store: serialization error: {0}")]
    Serialize(String),

    #[error("audit store: deserialization error: {0}")]
    Deserialize(String),
}
