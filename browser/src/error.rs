use std::io;

use thiserror::Error;

/// Failure modes of a master or game server query.
///
/// Both kinds are caught at the probe boundary and turned into entry state;
/// they never reach the registry's callers. The rendered message doubles as
/// the deduplication key for repeated-failure logging, so it must be stable
/// for a given failure mode.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed or unexpected wire data.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The endpoint could not be reached or did not answer in time.
    #[error("transport error: {0}")]
    Transport(String),
}

impl QueryError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        QueryError::Protocol(message.into())
    }
}

impl From<io::Error> for QueryError {
    fn from(error: io::Error) -> Self {
        QueryError::Transport(error.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for QueryError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        QueryError::Transport("no response within timeout".to_string())
    }
}

/// The only error the registry raises on its own behalf.
#[derive(Debug, Error)]
#[error("no master servers configured")]
pub struct ConfigError;
