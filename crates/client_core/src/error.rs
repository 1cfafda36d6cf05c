use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("socket not connected")]
    ConnectionAbsent,
    #[error("{0}")]
    Remote(String),
    #[error("remote request {event} timed out after {elapsed:?}")]
    Timeout {
        event: &'static str,
        elapsed: Duration,
    },
    #[error("unexpected reply to {event}")]
    UnexpectedResponse { event: &'static str },
    #[error("message content for {hash} is not valid JSON: {source}")]
    MalformedContent {
        hash: String,
        source: serde_json::Error,
    },
}

impl SyncError {
    /// Failures that should surface to the user as an error signal.
    /// A missing connection is only logged.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::ConnectionAbsent)
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
