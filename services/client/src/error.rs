//! Engine error taxonomy.
//!
//! Transport and device failures are recoverable at their respective layers;
//! authentication failures and protocol misuse are surfaced immediately to
//! the caller and never trigger reconnection.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("authentication timed out after {0:?}")]
    AuthTimeout(Duration),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("token provider failed: {0}")]
    Token(String),

    #[error("failed to assemble session context: {0}")]
    Context(String),

    #[error("frame serialization failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("`{command}` is not valid while the session is {state}")]
    InvalidState {
        command: &'static str,
        state: String,
    },

    #[error("activity `{0}` is not part of the current lesson")]
    UnknownActivity(String),

    #[error("session engine is no longer running")]
    Terminated,
}

impl EngineError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        EngineError::Transport(err.to_string())
    }
}
