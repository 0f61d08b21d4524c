//! # junction-protocol
//!
//! Wire protocol for the junction RPC framework.
//!
//! This crate provides:
//! - Length-prefixed binary framing with big-endian integer fields
//! - The six typed message bodies (RPC, topic and service requests/responses)
//!   with per-variant validation
//! - Streaming encoder/decoder
//! - Wire status codes and protocol constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::{ProtocolError, RCode};
pub use frame::{Frame, MAX_PENDING_BYTES};
pub use message::{
    Body, Host, MType, Message, RpcRequest, RpcResponse, ServiceOptype, ServiceRequest,
    ServiceResponse, TopicOptype, TopicRequest, TopicResponse,
};

/// Default port for a junction registry server.
pub const DEFAULT_REGISTRY_PORT: u16 = 7610;
