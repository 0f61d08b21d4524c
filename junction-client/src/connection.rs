//! Outbound connection establishment.

use crate::error::ClientError;
use junction_core::{CloseHook, Connection, Dispatcher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl ConnectConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Connects to a server and hands the socket to the shared IO runtime.
///
/// Inbound messages are routed through `dispatcher`; `close_hooks` run when
/// the connection terminates for any reason.
pub async fn connect(
    config: &ConnectConfig,
    dispatcher: Arc<Dispatcher>,
    close_hooks: Vec<CloseHook>,
) -> Result<Arc<Connection>, ClientError> {
    tracing::debug!("connecting to {}", config.addr);
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
        .await
        .map_err(|_| ClientError::ConnectTimeout)?
        .map_err(ClientError::Io)?;
    tracing::debug!("connected to {}", config.addr);
    Ok(junction_core::spawn(stream, dispatcher, close_hooks))
}
