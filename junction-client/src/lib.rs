//! # junction-client
//!
//! Client library for the junction RPC framework.
//!
//! This crate provides:
//! - The pending-request [`Requestor`] correlating responses by request id
//! - [`RpcCaller`] with synchronous, future and callback invocation shapes
//! - Registry clients: method registration, discovery with a round-robin
//!   endpoint cache, and ONLINE/OFFLINE reconciliation
//! - [`TopicClient`] for topic management, publication and delivery

pub mod caller;
pub mod client;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod requestor;
pub mod topic;

pub use caller::{RpcCaller, RpcReply};
pub use client::{RpcClient, TopicClient};
pub use connection::{connect, ConnectConfig};
pub use discovery::{
    Discoverer, DiscoveryClient, MethodHost, OfflineCallback, Provider, RegistryClient,
};
pub use error::ClientError;
pub use requestor::{PendingReply, Requestor};
pub use topic::{SubscribeCallback, TopicAgent};
