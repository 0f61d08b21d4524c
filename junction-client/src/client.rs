//! Composed client entry points.

use crate::caller::{RpcCaller, RpcReply};
use crate::connection::{connect, ConnectConfig};
use crate::discovery::{DiscoveryClient, OfflineCallback};
use crate::error::ClientError;
use crate::requestor::Requestor;
use crate::topic::{SubscribeCallback, TopicAgent};
use dashmap::DashMap;
use junction_core::{CloseHook, Connection, Dispatcher};
use junction_protocol::{Host, MType, TopicRequest};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

enum Mode {
    /// One connection to a fixed server; every call goes through it.
    Direct { conn: Arc<Connection> },
    /// Providers are resolved through the registry and connected lazily;
    /// connections are cached per advertised host.
    Registry {
        discovery: DiscoveryClient,
        conns: Arc<DashMap<Host, Arc<Connection>>>,
    },
}

/// RPC client.
///
/// In registry mode, OFFLINE notifications evict the cached connection for
/// the departed host, so the next call lands on a surviving provider.
pub struct RpcClient {
    requestor: Arc<Requestor>,
    caller: RpcCaller,
    dispatcher: Arc<Dispatcher>,
    mode: Mode,
}

impl RpcClient {
    /// Connects directly to the server at `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let (requestor, dispatcher) = rpc_plumbing();
        let fail = requestor.clone();
        let hooks: Vec<CloseHook> = vec![Box::new(move |conn| fail.fail_conn(conn.id()))];
        let conn = connect(&ConnectConfig::new(addr), dispatcher.clone(), hooks).await?;

        Ok(Self {
            caller: RpcCaller::new(requestor.clone()),
            requestor,
            dispatcher,
            mode: Mode::Direct { conn },
        })
    }

    /// Resolves providers through the registry at `registry_addr`.
    pub async fn with_registry(registry_addr: SocketAddr) -> Result<Self, ClientError> {
        let (requestor, dispatcher) = rpc_plumbing();
        let conns: Arc<DashMap<Host, Arc<Connection>>> = Arc::new(DashMap::new());

        let evict = conns.clone();
        let offline_cb: OfflineCallback = Arc::new(move |host| {
            if let Some((_, conn)) = evict.remove(host) {
                tracing::info!("evicting cached connection to offline provider {}", host);
                conn.shutdown();
            }
        });
        let discovery = DiscoveryClient::connect(registry_addr, offline_cb).await?;

        Ok(Self {
            caller: RpcCaller::new(requestor.clone()),
            requestor,
            dispatcher,
            mode: Mode::Registry { discovery, conns },
        })
    }

    /// Invokes `method` and waits for the result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let conn = self.resolve(method).await?;
        self.caller.call(&conn, method, params).await
    }

    /// Invokes `method`, returning a future for the result.
    pub async fn call_future(&self, method: &str, params: Value) -> Result<RpcReply, ClientError> {
        let conn = self.resolve(method).await?;
        self.caller.call_future(&conn, method, params)
    }

    /// Invokes `method`; `cb` receives the result exactly once.
    pub async fn call_with<F>(&self, method: &str, params: Value, cb: F) -> Result<(), ClientError>
    where
        F: FnOnce(Result<Value, ClientError>) + Send + 'static,
    {
        let conn = self.resolve(method).await?;
        self.caller.call_with(&conn, method, params, cb)
    }

    pub fn shutdown(&self) {
        match &self.mode {
            Mode::Direct { conn } => conn.shutdown(),
            Mode::Registry { discovery, conns } => {
                discovery.shutdown();
                for entry in conns.iter() {
                    entry.value().shutdown();
                }
            }
        }
    }

    async fn resolve(&self, method: &str) -> Result<Arc<Connection>, ClientError> {
        match &self.mode {
            Mode::Direct { conn } => Ok(conn.clone()),
            Mode::Registry { discovery, conns } => {
                let host = discovery.service_discovery(method).await?;
                if let Some(conn) = conns.get(&host) {
                    if conn.is_connected() {
                        return Ok(conn.value().clone());
                    }
                }
                self.open_provider(conns, &host).await
            }
        }
    }

    async fn open_provider(
        &self,
        conns: &Arc<DashMap<Host, Arc<Connection>>>,
        host: &Host,
    ) -> Result<Arc<Connection>, ClientError> {
        let ip: std::net::IpAddr = host
            .ip
            .parse()
            .map_err(|_| ClientError::InvalidHost(host.to_string()))?;
        let addr = SocketAddr::new(ip, host.port);

        let fail = self.requestor.clone();
        let cache = conns.clone();
        let cache_key = host.clone();
        let hooks: Vec<CloseHook> = vec![
            Box::new(move |conn| fail.fail_conn(conn.id())),
            Box::new(move |closing| {
                // Only drop the cache entry if it still refers to this
                // connection; a reconnect may have replaced it already.
                cache.remove_if(&cache_key, |_, cached| cached.id() == closing.id());
            }),
        ];

        let conn = connect(&ConnectConfig::new(addr), self.dispatcher.clone(), hooks).await?;
        conns.insert(host.clone(), conn.clone());
        tracing::debug!("opened provider connection to {}", host);
        Ok(conn)
    }
}

fn rpc_plumbing() -> (Arc<Requestor>, Arc<Dispatcher>) {
    let requestor = Arc::new(Requestor::new());
    let dispatcher = Arc::new(Dispatcher::new());
    let responses = requestor.clone();
    dispatcher.register_raw(MType::RspRpc, move |conn, msg| responses.on_response(conn, msg));
    (requestor, dispatcher)
}

/// Topic client: create/remove/subscribe/cancel/publish over one connection.
pub struct TopicClient {
    agent: Arc<TopicAgent>,
    conn: Arc<Connection>,
}

impl TopicClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let requestor = Arc::new(Requestor::new());
        let agent = Arc::new(TopicAgent::new(requestor.clone()));
        let dispatcher = Arc::new(Dispatcher::new());

        let responses = requestor.clone();
        dispatcher.register_raw(MType::RspTopic, move |conn, msg| {
            responses.on_response(conn, msg)
        });
        let publications = agent.clone();
        dispatcher.register::<TopicRequest, _>(MType::ReqTopic, move |_conn, _rid, req| {
            publications.on_publish(req)
        });

        let fail = requestor.clone();
        let hooks: Vec<CloseHook> = vec![Box::new(move |conn| fail.fail_conn(conn.id()))];
        let conn = connect(&ConnectConfig::new(addr), dispatcher, hooks).await?;

        Ok(Self { agent, conn })
    }

    pub async fn create(&self, key: &str) -> Result<(), ClientError> {
        self.agent.create(&self.conn, key).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.agent.remove(&self.conn, key).await
    }

    pub async fn subscribe(&self, key: &str, cb: SubscribeCallback) -> Result<(), ClientError> {
        self.agent.subscribe(&self.conn, key, cb).await
    }

    pub async fn cancel(&self, key: &str) -> Result<(), ClientError> {
        self.agent.cancel(&self.conn, key).await
    }

    pub async fn publish(&self, key: &str, msg: &str) -> Result<(), ClientError> {
        self.agent.publish(&self.conn, key, msg).await
    }

    pub fn shutdown(&self) {
        self.conn.shutdown();
    }
}
