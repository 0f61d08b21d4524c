//! Client error types.

use junction_core::CoreError;
use junction_protocol::RCode;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] junction_protocol::ProtocolError),

    #[error("connection is down")]
    Disconnected,

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("request failed: {rcode}")]
    Rejected { rcode: RCode },

    #[error("response body does not match the request")]
    UnexpectedResponse,

    #[error("no provider found for method {0}")]
    NoProvider(String),

    #[error("provider advertises an unusable address: {0}")]
    InvalidHost(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CoreError> for ClientError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => ClientError::Io(e),
            CoreError::Protocol(e) => ClientError::Protocol(e),
            CoreError::Disconnected => ClientError::Disconnected,
        }
    }
}

impl ClientError {
    /// The wire status the peer reported, if this error carries one.
    pub fn rcode(&self) -> Option<RCode> {
        match self {
            ClientError::Rejected { rcode } => Some(*rcode),
            _ => None,
        }
    }
}
