//! Server error types.

use junction_protocol::RCode;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] junction_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("registry error: {0}")]
    Registry(#[from] junction_client::ClientError),

    #[error("service handler failed: {0}")]
    Handler(String),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// The wire status code reported for this failure.
    pub fn rcode(&self) -> RCode {
        match self {
            ServerError::Protocol(e) => e.rcode(),
            ServerError::Json(_) => RCode::ParseFailed,
            ServerError::Handler(_) => RCode::InternalError,
            _ => RCode::InternalError,
        }
    }
}
