//! # junction-server
//!
//! Server library for the junction RPC framework.
//!
//! This crate provides:
//! - [`RpcServer`]: method routing with schema validation plus topic hosting
//! - [`RegistryServer`]: provider registration, discovery and online/offline
//!   push notifications
//! - YAML + environment configuration in [`config`]

pub mod config;
pub mod error;
pub mod registry;
pub mod router;
pub mod server;
pub mod topic;

pub use config::{Config, ConfigError, NetworkConfig};
pub use error::ServerError;
pub use registry::PdManager;
pub use router::{RpcRouter, ServiceDescribe, ServiceDescribeBuilder, ServiceManager, VType};
pub use server::{RegistryServer, RpcServer, ServerConfig, ServerStats};
pub use topic::TopicManager;
