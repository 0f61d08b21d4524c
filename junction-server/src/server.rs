//! TCP servers.

use crate::error::ServerError;
use crate::registry::PdManager;
use crate::router::{RpcRouter, ServiceDescribe};
use crate::topic::TopicManager;
use junction_client::RegistryClient;
use junction_core::{CloseHook, Connection, Dispatcher};
use junction_protocol::{Host, MType, RpcRequest, ServiceRequest, TopicRequest};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], junction_protocol::DEFAULT_REGISTRY_PORT)),
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
}

type SharedHook = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Accept loop shared by the concrete servers: guards the connection limit,
/// hands each socket to the shared IO runtime and wires per-connection close
/// hooks for the managers.
struct ServerCore {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    close_hooks: Vec<SharedHook>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
}

impl ServerCore {
    async fn bind(
        config: ServerConfig,
        dispatcher: Arc<Dispatcher>,
        close_hooks: Vec<SharedHook>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            config,
            listener,
            local_addr,
            dispatcher,
            close_hooks,
            stats: Arc::new(ServerStats::default()),
            shutdown,
        })
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn run(&self) -> Result<(), ServerError> {
        tracing::info!("server listening on {}", self.local_addr);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                            tracing::info!("client connected: {}", addr);

                            let mut hooks: Vec<CloseHook> = Vec::new();
                            for hook in &self.close_hooks {
                                let hook = hook.clone();
                                hooks.push(Box::new(move |conn| hook(conn)));
                            }
                            let stats = self.stats.clone();
                            hooks.push(Box::new(move |conn| {
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("client disconnected: {}", conn.peer_addr());
                            }));

                            junction_core::spawn(stream, self.dispatcher.clone(), hooks);
                        }
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

/// The registry server: hosts the provider/discoverer state and pushes
/// ONLINE/OFFLINE notifications.
pub struct RegistryServer {
    core: ServerCore,
}

impl RegistryServer {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let pd = Arc::new(PdManager::new());
        let dispatcher = Arc::new(Dispatcher::new());

        let requests = pd.clone();
        dispatcher.register::<ServiceRequest, _>(MType::ReqService, move |conn, rid, req| {
            requests.on_service_request(conn, rid, req)
        });

        let on_close = pd.clone();
        let close_hooks: Vec<SharedHook> =
            vec![Arc::new(move |conn: &Arc<Connection>| on_close.on_conn_shutdown(conn))];

        let core = ServerCore::bind(config, dispatcher, close_hooks).await?;
        Ok(Self { core })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.core.local_addr()
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        self.core.run().await
    }

    pub fn shutdown(&self) {
        self.core.shutdown();
    }
}

/// The RPC server: routes method calls and hosts topics. With a registry
/// address configured, registered methods are advertised there.
pub struct RpcServer {
    core: ServerCore,
    router: Arc<RpcRouter>,
    registry: Option<(RegistryClient, Host)>,
}

impl RpcServer {
    /// Direct mode: serves methods and topics on `config.bind_addr`.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_inner(config, None).await
    }

    /// Registry mode: like [`bind`](Self::bind), and every registered method
    /// is advertised to the registry at `registry_addr` as served by
    /// `access_host` — the address clients should connect to. With no
    /// explicit `access_host`, the actual bound address is advertised.
    pub async fn with_registry(
        config: ServerConfig,
        registry_addr: SocketAddr,
        access_host: Option<Host>,
    ) -> Result<Self, ServerError> {
        Self::bind_inner(config, Some((registry_addr, access_host))).await
    }

    async fn bind_inner(
        config: ServerConfig,
        registry: Option<(SocketAddr, Option<Host>)>,
    ) -> Result<Self, ServerError> {
        let router = Arc::new(RpcRouter::new());
        let topics = Arc::new(TopicManager::new());
        let dispatcher = Arc::new(Dispatcher::new());

        let calls = router.clone();
        dispatcher.register::<RpcRequest, _>(MType::ReqRpc, move |conn, rid, req| {
            calls.on_rpc_request(conn, rid, req)
        });
        let topic_requests = topics.clone();
        dispatcher.register::<TopicRequest, _>(MType::ReqTopic, move |conn, rid, req| {
            topic_requests.on_topic_request(conn, rid, req)
        });

        let on_close = topics.clone();
        let close_hooks: Vec<SharedHook> =
            vec![Arc::new(move |conn: &Arc<Connection>| on_close.on_conn_shutdown(conn))];

        let core = ServerCore::bind(config, dispatcher, close_hooks).await?;

        let registry = match registry {
            Some((addr, host)) => {
                let host = host.unwrap_or_else(|| {
                    Host::new(core.local_addr().ip().to_string(), core.local_addr().port())
                });
                let client = RegistryClient::connect(addr).await?;
                Some((client, host))
            }
            None => None,
        };

        Ok(Self {
            core,
            router,
            registry,
        })
    }

    /// Registers a method locally, then advertises it to the registry when
    /// one is configured.
    pub async fn register_method(&self, describe: ServiceDescribe) -> Result<(), ServerError> {
        let method = describe.method().to_string();
        self.router.register_method(describe);
        if let Some((registry, host)) = &self.registry {
            registry.register_method(&method, host).await?;
            tracing::info!("method {} advertised as {}", method, host);
        }
        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.core.local_addr()
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        self.core.run().await
    }

    /// Stops accepting and drops the registry connection, which triggers
    /// OFFLINE notifications for every advertised method.
    pub fn shutdown(&self) {
        if let Some((registry, _)) = &self.registry {
            registry.shutdown();
        }
        self.core.shutdown();
    }
}
