//! Runtime error types.

use thiserror::Error;

/// Errors from the connection runtime.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] junction_protocol::ProtocolError),

    #[error("connection is down")]
    Disconnected,
}
