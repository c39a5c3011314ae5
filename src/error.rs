//! Error types for dispatch and streaming.

use std::time::Duration;
use thiserror::Error;

/// Failure to inject text into the terminal multiplexer
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to execute tmux: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("tmux rejected input for {target}: {stderr}")]
    Rejected { target: String, stderr: String },
}

/// Reasons a stream ends without `conversation_complete`
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to send command: {0}")]
    DispatchFailed(#[from] DispatchError),
    #[error("Could not identify session for command within {0:?}")]
    CorrelationTimeout(Duration),
    #[error("Session log {0} not found")]
    SessionNotFound(String),
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("No activity for {0:?}")]
    IdleTimeout(Duration),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Machine-readable kind carried on the `error` event
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::DispatchFailed(_) => "dispatch_failed",
            StreamError::CorrelationTimeout(_) => "correlation_timeout",
            StreamError::SessionNotFound(_) => "session_not_found",
            StreamError::BadRequest(_) => "bad_request",
            StreamError::IdleTimeout(_) => "idle_timeout",
            StreamError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Internal(e.to_string())
    }
}
