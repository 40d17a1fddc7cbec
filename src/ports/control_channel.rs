use async_trait::async_trait;
use thiserror::Error;

use crate::core::error::ControlError;

/// Transport failures talking to the proxy control socket
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ControlChannelError {
    /// Socket missing or refusing connections
    #[error("Control socket {path} unavailable: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect or read exceeded the configured deadline
    #[error("Control socket {path} timed out after {millis}ms")]
    Timeout { path: String, millis: u128 },

    /// Connection dropped mid-command
    #[error("Control socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for control channel operations
pub type ControlChannelResult<T> = Result<T, ControlChannelError>;

impl From<ControlChannelError> for ControlError {
    fn from(err: ControlChannelError) -> Self {
        ControlError::RuntimeUnavailable(err.to_string())
    }
}

/// ControlChannel defines the port for issuing runtime commands to the proxy
///
/// One call is one command and one complete reply. Implementations must
/// bound every call with a timeout.
#[async_trait]
pub trait ControlChannel: Send + Sync + 'static {
    /// Send `command` (without trailing newline) and return the raw reply.
    async fn execute(&self, command: &str) -> ControlChannelResult<String>;
}
