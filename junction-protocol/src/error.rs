//! Protocol error types and wire status codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("malformed frame: id length {idlen} exceeds framed region of {total} bytes")]
    TruncatedFrame { idlen: usize, total: usize },

    #[error("request id is not valid UTF-8")]
    InvalidRequestId,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message failed validation: {0}")]
    InvalidMessage(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// The wire status code a peer would report for this failure.
    pub fn rcode(&self) -> RCode {
        match self {
            ProtocolError::UnknownMessageType(_) => RCode::ErrorMsgType,
            ProtocolError::InvalidMessage(_) => RCode::InvalidMsg,
            _ => RCode::ParseFailed,
        }
    }
}

/// Stable status codes carried in every response.
///
/// The ordinals are part of the wire contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum RCode {
    Ok = 0,
    ParseFailed = 1,
    ErrorMsgType = 2,
    InvalidMsg = 3,
    Disconnected = 4,
    InvalidParams = 5,
    NotFoundService = 6,
    InvalidOptype = 7,
    NotFoundTopic = 8,
    InternalError = 9,
}

impl RCode {
    /// Human-readable description of the status code.
    pub fn reason(&self) -> &'static str {
        match self {
            RCode::Ok => "success",
            RCode::ParseFailed => "message could not be parsed",
            RCode::ErrorMsgType => "wrong message type",
            RCode::InvalidMsg => "message failed validation",
            RCode::Disconnected => "connection is down",
            RCode::InvalidParams => "invalid parameters",
            RCode::NotFoundService => "no such service",
            RCode::InvalidOptype => "invalid operation type",
            RCode::NotFoundTopic => "no such topic",
            RCode::InternalError => "internal error",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RCode::Ok)
    }
}

impl From<RCode> for i32 {
    fn from(code: RCode) -> i32 {
        code as i32
    }
}

impl TryFrom<i32> for RCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RCode::Ok),
            1 => Ok(RCode::ParseFailed),
            2 => Ok(RCode::ErrorMsgType),
            3 => Ok(RCode::InvalidMsg),
            4 => Ok(RCode::Disconnected),
            5 => Ok(RCode::InvalidParams),
            6 => Ok(RCode::NotFoundService),
            7 => Ok(RCode::InvalidOptype),
            8 => Ok(RCode::NotFoundTopic),
            9 => Ok(RCode::InternalError),
            other => Err(format!("unknown rcode: {other}")),
        }
    }
}

impl fmt::Display for RCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}
