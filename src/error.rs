use thiserror::Error;

/// Convenience type alias for Results with DispatchError
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Main error type for the dispatch fabric.
///
/// Validation, authorisation, existence, capacity, liveness and internal
/// errors each get their own shape so HTTP handlers can translate them to
/// the right status code without re-deriving the classification.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authorization failure")]
    Unauthorized,

    #[error("Agent doesn't exists")]
    UnknownAgent,

    #[error("{0}")]
    NotFound(String),

    #[error("Queue is overflowed. Check agent.")]
    QueueOverflow,

    #[error("Time out while waiting for task result")]
    Timeout,

    #[error("Agent deregistered")]
    AgentDeregistered,

    #[error("{0} only supports {1}")]
    MethodNotAllowed(String, String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
