//! # junction-core
//!
//! Message-plane runtime shared by junction clients and servers.
//!
//! This crate provides:
//! - A per-connection IO task driving decode/dispatch and an outbound queue
//! - The cheap [`Connection`] handle other components send through
//! - The type-dispatched [`Dispatcher`] routing inbound messages by tag

pub mod connection;
pub mod dispatcher;
pub mod error;

pub use connection::{spawn, CloseHook, ConnId, Connection};
pub use dispatcher::{Dispatcher, FromMessage};
pub use error::CoreError;
