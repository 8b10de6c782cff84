//! Error types for the conversational core.

use roam_core::error::RoamError;

/// Errors raised while handling a client query.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("turn timed out after {0} seconds")]
    Timeout(u64),
    #[error("transport closed")]
    TransportClosed,
    #[error("capability error: {0}")]
    Capability(String),
}

impl From<RoamError> for ChatError {
    fn from(err: RoamError) -> Self {
        ChatError::Engine(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Engine(err.to_string())
    }
}

impl From<ChatError> for RoamError {
    fn from(err: ChatError) -> Self {
        RoamError::Engine(err.to_string())
    }
}
