//! Typed wire messages and the envelope that carries them.
//!
//! Every message on the wire is a [`Message`]: a request id plus one of six
//! body variants. The message type tag is derived from the variant, so a
//! mismatched tag/body pair cannot be constructed. [`Body::decode`] is the
//! factory that picks the variant for an inbound frame's tag.

use crate::error::{ProtocolError, RCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Message type tags. The ordinals are the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MType {
    ReqRpc = 0,
    RspRpc = 1,
    ReqTopic = 2,
    RspTopic = 3,
    ReqService = 4,
    RspService = 5,
}

impl MType {
    pub fn from_u32(value: u32) -> Option<MType> {
        match value {
            0 => Some(MType::ReqRpc),
            1 => Some(MType::RspRpc),
            2 => Some(MType::ReqTopic),
            3 => Some(MType::RspTopic),
            4 => Some(MType::ReqService),
            5 => Some(MType::RspService),
            _ => None,
        }
    }

    /// The response tag paired with a request tag, if any.
    pub fn response_type(&self) -> Option<MType> {
        match self {
            MType::ReqRpc => Some(MType::RspRpc),
            MType::ReqTopic => Some(MType::RspTopic),
            MType::ReqService => Some(MType::RspService),
            _ => None,
        }
    }
}

/// Topic operation types. Ordinals are the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum TopicOptype {
    Create = 0,
    Remove = 1,
    Subscribe = 2,
    Cancel = 3,
    Publish = 4,
}

impl From<TopicOptype> for i32 {
    fn from(op: TopicOptype) -> i32 {
        op as i32
    }
}

impl TryFrom<i32> for TopicOptype {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TopicOptype::Create),
            1 => Ok(TopicOptype::Remove),
            2 => Ok(TopicOptype::Subscribe),
            3 => Ok(TopicOptype::Cancel),
            4 => Ok(TopicOptype::Publish),
            other => Err(format!("unknown topic optype: {other}")),
        }
    }
}

/// Service operation types. Ordinals are the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ServiceOptype {
    Registry = 0,
    Discovery = 1,
    Online = 2,
    Offline = 3,
    Unknown = 4,
}

impl From<ServiceOptype> for i32 {
    fn from(op: ServiceOptype) -> i32 {
        op as i32
    }
}

impl TryFrom<i32> for ServiceOptype {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServiceOptype::Registry),
            1 => Ok(ServiceOptype::Discovery),
            2 => Ok(ServiceOptype::Online),
            3 => Ok(ServiceOptype::Offline),
            4 => Ok(ServiceOptype::Unknown),
            other => Err(format!("unknown service optype: {other}")),
        }
    }
}

/// A provider endpoint as carried in service messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,
    pub port: u16,
}

impl Host {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// RPC invocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(rename = "parameters")]
    pub params: Value,
}

impl RpcRequest {
    fn check(&self) -> Result<(), ProtocolError> {
        if self.method.is_empty() {
            return Err(ProtocolError::InvalidMessage("rpc request without method"));
        }
        if !self.params.is_object() {
            return Err(ProtocolError::InvalidMessage(
                "rpc request parameters must be an object",
            ));
        }
        Ok(())
    }
}

/// RPC invocation response. `result` is only meaningful when `rcode` is OK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub rcode: RCode,
    #[serde(default)]
    pub result: Value,
}

/// Topic operation request. `topic_msg` is the published payload and is
/// required exactly when `optype` is [`TopicOptype::Publish`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRequest {
    pub topic_key: String,
    pub optype: TopicOptype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_msg: Option<String>,
}

impl TopicRequest {
    fn check(&self) -> Result<(), ProtocolError> {
        if self.topic_key.is_empty() {
            return Err(ProtocolError::InvalidMessage("topic request without key"));
        }
        if self.optype == TopicOptype::Publish && self.topic_msg.is_none() {
            return Err(ProtocolError::InvalidMessage(
                "topic publish without message payload",
            ));
        }
        Ok(())
    }
}

/// Topic operation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicResponse {
    pub rcode: RCode,
}

/// Service registry/discovery request. `host` is required for every optype
/// except [`ServiceOptype::Discovery`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub method: String,
    pub optype: ServiceOptype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Host>,
}

impl ServiceRequest {
    fn check(&self) -> Result<(), ProtocolError> {
        if self.method.is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "service request without method",
            ));
        }
        if self.optype != ServiceOptype::Discovery && self.host.is_none() {
            return Err(ProtocolError::InvalidMessage(
                "service request without host",
            ));
        }
        Ok(())
    }
}

/// Service registry/discovery response. Successful discovery responses carry
/// the method name and the current provider list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub rcode: RCode,
    pub optype: ServiceOptype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Vec<Host>>,
}

impl ServiceResponse {
    fn check(&self) -> Result<(), ProtocolError> {
        if self.optype == ServiceOptype::Discovery
            && self.rcode.is_ok()
            && (self.method.is_none() || self.host.is_none())
        {
            return Err(ProtocolError::InvalidMessage(
                "discovery response without method or host list",
            ));
        }
        Ok(())
    }
}

/// One of the six message bodies, tagged by [`MType`].
#[derive(Debug, Clone)]
pub enum Body {
    RpcRequest(RpcRequest),
    RpcResponse(RpcResponse),
    TopicRequest(TopicRequest),
    TopicResponse(TopicResponse),
    ServiceRequest(ServiceRequest),
    ServiceResponse(ServiceResponse),
}

impl Body {
    /// Factory: deserializes `payload` as the variant selected by `mtype`.
    pub fn decode(mtype: MType, payload: &[u8]) -> Result<Body, ProtocolError> {
        Ok(match mtype {
            MType::ReqRpc => Body::RpcRequest(serde_json::from_slice(payload)?),
            MType::RspRpc => Body::RpcResponse(serde_json::from_slice(payload)?),
            MType::ReqTopic => Body::TopicRequest(serde_json::from_slice(payload)?),
            MType::RspTopic => Body::TopicResponse(serde_json::from_slice(payload)?),
            MType::ReqService => Body::ServiceRequest(serde_json::from_slice(payload)?),
            MType::RspService => Body::ServiceResponse(serde_json::from_slice(payload)?),
        })
    }

    /// Serializes the body to its JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(match self {
            Body::RpcRequest(b) => serde_json::to_vec(b)?,
            Body::RpcResponse(b) => serde_json::to_vec(b)?,
            Body::TopicRequest(b) => serde_json::to_vec(b)?,
            Body::TopicResponse(b) => serde_json::to_vec(b)?,
            Body::ServiceRequest(b) => serde_json::to_vec(b)?,
            Body::ServiceResponse(b) => serde_json::to_vec(b)?,
        })
    }

    pub fn mtype(&self) -> MType {
        match self {
            Body::RpcRequest(_) => MType::ReqRpc,
            Body::RpcResponse(_) => MType::RspRpc,
            Body::TopicRequest(_) => MType::ReqTopic,
            Body::TopicResponse(_) => MType::RspTopic,
            Body::ServiceRequest(_) => MType::ReqService,
            Body::ServiceResponse(_) => MType::RspService,
        }
    }

    fn check(&self) -> Result<(), ProtocolError> {
        match self {
            Body::RpcRequest(b) => b.check(),
            Body::RpcResponse(_) => Ok(()),
            Body::TopicRequest(b) => b.check(),
            Body::TopicResponse(_) => Ok(()),
            Body::ServiceRequest(b) => b.check(),
            Body::ServiceResponse(b) => b.check(),
        }
    }
}

/// A wire message: request id plus typed body.
#[derive(Debug, Clone)]
pub struct Message {
    pub rid: String,
    pub body: Body,
}

impl Message {
    pub fn new(rid: impl Into<String>, body: Body) -> Self {
        Self {
            rid: rid.into(),
            body,
        }
    }

    pub fn mtype(&self) -> MType {
        self.body.mtype()
    }

    /// Validates the body beyond what deserialization enforces.
    pub fn check(&self) -> Result<(), ProtocolError> {
        self.body.check()
    }

    pub fn rpc_request(rid: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self::new(
            rid,
            Body::RpcRequest(RpcRequest {
                method: method.into(),
                params,
            }),
        )
    }

    pub fn rpc_response(rid: impl Into<String>, rcode: RCode, result: Value) -> Self {
        Self::new(rid, Body::RpcResponse(RpcResponse { rcode, result }))
    }

    pub fn topic_request(
        rid: impl Into<String>,
        topic_key: impl Into<String>,
        optype: TopicOptype,
        topic_msg: Option<String>,
    ) -> Self {
        Self::new(
            rid,
            Body::TopicRequest(TopicRequest {
                topic_key: topic_key.into(),
                optype,
                topic_msg,
            }),
        )
    }

    pub fn topic_response(rid: impl Into<String>, rcode: RCode) -> Self {
        Self::new(rid, Body::TopicResponse(TopicResponse { rcode }))
    }

    pub fn service_request(
        rid: impl Into<String>,
        method: impl Into<String>,
        optype: ServiceOptype,
        host: Option<Host>,
    ) -> Self {
        Self::new(
            rid,
            Body::ServiceRequest(ServiceRequest {
                method: method.into(),
                optype,
                host,
            }),
        )
    }

    pub fn service_response(
        rid: impl Into<String>,
        rcode: RCode,
        optype: ServiceOptype,
        method: Option<String>,
        host: Option<Vec<Host>>,
    ) -> Self {
        Self::new(
            rid,
            Body::ServiceResponse(ServiceResponse {
                rcode,
                optype,
                method,
                host,
            }),
        )
    }

    /// Synthetic local response delivered to waiters when the connection
    /// carrying their request goes down. Never transmitted on the wire.
    pub fn disconnected_reply(request_mtype: MType, rid: impl Into<String>) -> Option<Message> {
        match request_mtype {
            MType::ReqRpc => Some(Message::rpc_response(rid, RCode::Disconnected, Value::Null)),
            MType::ReqTopic => Some(Message::topic_response(rid, RCode::Disconnected)),
            MType::ReqService => Some(Message::service_response(
                rid,
                RCode::Disconnected,
                ServiceOptype::Unknown,
                None,
                None,
            )),
            _ => None,
        }
    }
}
