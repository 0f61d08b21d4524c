//! Service registration and discovery, client side.

use crate::connection::{connect, ConnectConfig};
use crate::error::ClientError;
use crate::requestor::Requestor;
use junction_core::{CloseHook, Connection, Dispatcher};
use junction_protocol::{Body, Host, MType, Message, ServiceOptype, ServiceRequest};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Registers hosted methods with the registry server.
pub struct Provider {
    requestor: Arc<Requestor>,
}

impl Provider {
    pub fn new(requestor: Arc<Requestor>) -> Self {
        Self { requestor }
    }

    /// Advertises `method` as served by `host`.
    pub async fn register_method(
        &self,
        conn: &Arc<Connection>,
        method: &str,
        host: &Host,
    ) -> Result<(), ClientError> {
        let req = Message::service_request(
            Uuid::new_v4().to_string(),
            method,
            ServiceOptype::Registry,
            Some(host.clone()),
        );
        let reply = self.requestor.send_await(conn, req).await?;
        match reply.body {
            Body::ServiceResponse(rsp) if rsp.rcode.is_ok() => Ok(()),
            Body::ServiceResponse(rsp) => Err(ClientError::Rejected { rcode: rsp.rcode }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Endpoint set for one method with a round-robin cursor.
///
/// Selection order is insertion order; the cursor wraps modulo the current
/// set size.
pub struct MethodHost {
    inner: Mutex<MethodHostInner>,
}

struct MethodHostInner {
    hosts: Vec<Host>,
    cursor: usize,
}

impl MethodHost {
    pub fn new() -> Self {
        Self::from_hosts(Vec::new())
    }

    pub fn from_hosts(hosts: Vec<Host>) -> Self {
        Self {
            inner: Mutex::new(MethodHostInner { hosts, cursor: 0 }),
        }
    }

    pub fn append(&self, host: Host) {
        self.inner.lock().unwrap().hosts.push(host);
    }

    pub fn remove(&self, host: &Host) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.hosts.iter().position(|h| h == host) {
            inner.hosts.remove(pos);
        }
    }

    /// Next endpoint in round-robin order, or `None` when the set is empty.
    pub fn choose(&self) -> Option<Host> {
        let mut inner = self.inner.lock().unwrap();
        if inner.hosts.is_empty() {
            return None;
        }
        let pos = inner.cursor % inner.hosts.len();
        inner.cursor += 1;
        Some(inner.hosts[pos].clone())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().hosts.is_empty()
    }
}

impl Default for MethodHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoked with each host reported OFFLINE so the owner can drop cached
/// connections to it.
pub type OfflineCallback = Arc<dyn Fn(&Host) + Send + Sync>;

/// Cached method → endpoint sets, filled by DISCOVERY round-trips and
/// reconciled by ONLINE/OFFLINE pushes from the registry.
pub struct Discoverer {
    requestor: Arc<Requestor>,
    method_hosts: Mutex<HashMap<String, Arc<MethodHost>>>,
    offline_cb: OfflineCallback,
}

impl Discoverer {
    pub fn new(requestor: Arc<Requestor>, offline_cb: OfflineCallback) -> Self {
        Self {
            requestor,
            method_hosts: Mutex::new(HashMap::new()),
            offline_cb,
        }
    }

    /// Resolves `method` to a provider endpoint.
    ///
    /// A warm, non-empty cache entry answers locally with the next
    /// round-robin pick. Otherwise one DISCOVERY round-trip installs the
    /// registry's current host list and returns its first pick.
    pub async fn service_discovery(
        &self,
        conn: &Arc<Connection>,
        method: &str,
    ) -> Result<Host, ClientError> {
        {
            let cache = self.method_hosts.lock().unwrap();
            if let Some(method_host) = cache.get(method) {
                if let Some(host) = method_host.choose() {
                    return Ok(host);
                }
            }
        }

        let req = Message::service_request(
            Uuid::new_v4().to_string(),
            method,
            ServiceOptype::Discovery,
            None,
        );
        let reply = self.requestor.send_await(conn, req).await?;
        let rsp = match reply.body {
            Body::ServiceResponse(rsp) => rsp,
            _ => return Err(ClientError::UnexpectedResponse),
        };
        if !rsp.rcode.is_ok() {
            tracing::warn!("discovery for {} failed: {}", method, rsp.rcode);
            return Err(ClientError::Rejected { rcode: rsp.rcode });
        }

        let method_host = Arc::new(MethodHost::from_hosts(rsp.host.unwrap_or_default()));
        let pick = method_host
            .choose()
            .ok_or_else(|| ClientError::NoProvider(method.to_string()))?;
        self.method_hosts
            .lock()
            .unwrap()
            .insert(method.to_string(), method_host);
        Ok(pick)
    }

    /// Dispatcher hook for ONLINE/OFFLINE pushes from the registry.
    pub fn on_service_request(&self, req: ServiceRequest) {
        let Some(host) = req.host else {
            // check() rules this out for ONLINE/OFFLINE.
            return;
        };
        match req.optype {
            ServiceOptype::Online => {
                tracing::info!("provider {} online for {}", host, req.method);
                let mut cache = self.method_hosts.lock().unwrap();
                cache
                    .entry(req.method)
                    .or_insert_with(|| Arc::new(MethodHost::new()))
                    .append(host);
            }
            ServiceOptype::Offline => {
                tracing::info!("provider {} offline for {}", host, req.method);
                let method_host = self.method_hosts.lock().unwrap().get(&req.method).cloned();
                if let Some(method_host) = method_host {
                    method_host.remove(&host);
                    (self.offline_cb)(&host);
                }
            }
            _ => {}
        }
    }
}

/// Client connection to the registry used by servers to advertise methods.
pub struct RegistryClient {
    provider: Provider,
    conn: Arc<Connection>,
}

impl RegistryClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let requestor = Arc::new(Requestor::new());
        let dispatcher = Arc::new(Dispatcher::new());
        let responses = requestor.clone();
        dispatcher.register_raw(MType::RspService, move |conn, msg| {
            responses.on_response(conn, msg)
        });

        let fail = requestor.clone();
        let hooks: Vec<CloseHook> = vec![Box::new(move |conn| fail.fail_conn(conn.id()))];
        let conn = connect(&ConnectConfig::new(addr), dispatcher, hooks).await?;

        Ok(Self {
            provider: Provider::new(requestor),
            conn,
        })
    }

    pub async fn register_method(&self, method: &str, host: &Host) -> Result<(), ClientError> {
        self.provider.register_method(&self.conn, method, host).await
    }

    pub fn shutdown(&self) {
        self.conn.shutdown();
    }
}

/// Client connection to the registry used for discovery and notifications.
pub struct DiscoveryClient {
    discoverer: Arc<Discoverer>,
    conn: Arc<Connection>,
}

impl DiscoveryClient {
    pub async fn connect(addr: SocketAddr, offline_cb: OfflineCallback) -> Result<Self, ClientError> {
        let requestor = Arc::new(Requestor::new());
        let discoverer = Arc::new(Discoverer::new(requestor.clone(), offline_cb));
        let dispatcher = Arc::new(Dispatcher::new());

        let responses = requestor.clone();
        dispatcher.register_raw(MType::RspService, move |conn, msg| {
            responses.on_response(conn, msg)
        });
        let notifications = discoverer.clone();
        dispatcher.register::<ServiceRequest, _>(MType::ReqService, move |_conn, _rid, req| {
            notifications.on_service_request(req)
        });

        let fail = requestor.clone();
        let hooks: Vec<CloseHook> = vec![Box::new(move |conn| fail.fail_conn(conn.id()))];
        let conn = connect(&ConnectConfig::new(addr), dispatcher, hooks).await?;

        Ok(Self { discoverer, conn })
    }

    pub async fn service_discovery(&self, method: &str) -> Result<Host, ClientError> {
        self.discoverer.service_discovery(&self.conn, method).await
    }

    pub fn shutdown(&self) {
        self.conn.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn host(port: u16) -> Host {
        Host::new("127.0.0.1", port)
    }

    #[test]
    fn test_round_robin_in_insertion_order() {
        let mh = MethodHost::from_hosts(vec![host(9091), host(9092), host(9093)]);
        let picks: Vec<u16> = (0..6).map(|_| mh.choose().unwrap().port).collect();
        assert_eq!(picks, [9091, 9092, 9093, 9091, 9092, 9093]);
    }

    #[test]
    fn test_remove_preserves_order_of_rest() {
        let mh = MethodHost::from_hosts(vec![host(9091), host(9092)]);
        mh.remove(&host(9091));
        assert_eq!(mh.choose().unwrap().port, 9092);
        assert_eq!(mh.choose().unwrap().port, 9092);

        mh.remove(&host(9092));
        assert!(mh.choose().is_none());
        assert!(mh.is_empty());
    }

    #[test]
    fn test_online_creates_and_appends() {
        let requestor = Arc::new(Requestor::new());
        let discoverer = Discoverer::new(requestor, Arc::new(|_| {}));

        discoverer.on_service_request(ServiceRequest {
            method: "Echo".into(),
            optype: ServiceOptype::Online,
            host: Some(host(9091)),
        });
        discoverer.on_service_request(ServiceRequest {
            method: "Echo".into(),
            optype: ServiceOptype::Online,
            host: Some(host(9092)),
        });

        let cache = discoverer.method_hosts.lock().unwrap();
        let mh = cache.get("Echo").unwrap();
        assert_eq!(mh.choose().unwrap().port, 9091);
        assert_eq!(mh.choose().unwrap().port, 9092);
    }

    #[test]
    fn test_offline_removes_and_fires_callback() {
        let requestor = Arc::new(Requestor::new());
        let evicted = Arc::new(AtomicUsize::new(0));
        let counter = evicted.clone();
        let discoverer = Discoverer::new(
            requestor,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        discoverer.on_service_request(ServiceRequest {
            method: "Echo".into(),
            optype: ServiceOptype::Online,
            host: Some(host(9091)),
        });
        discoverer.on_service_request(ServiceRequest {
            method: "Echo".into(),
            optype: ServiceOptype::Offline,
            host: Some(host(9091)),
        });

        assert_eq!(evicted.load(Ordering::SeqCst), 1);
        let cache = discoverer.method_hosts.lock().unwrap();
        assert!(cache.get("Echo").unwrap().is_empty());
    }

    #[test]
    fn test_offline_for_unknown_method_is_ignored() {
        let requestor = Arc::new(Requestor::new());
        let evicted = Arc::new(AtomicUsize::new(0));
        let counter = evicted.clone();
        let discoverer = Discoverer::new(
            requestor,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        discoverer.on_service_request(ServiceRequest {
            method: "Ghost".into(),
            optype: ServiceOptype::Offline,
            host: Some(host(9091)),
        });
        assert_eq!(evicted.load(Ordering::SeqCst), 0);
    }
}
