//! Provider registration and discoverer subscriptions, registry side.
//!
//! Two double-indexed managers under one lock each: providers by method and
//! by connection, discoverers likewise. ONLINE/OFFLINE pushes are sent from
//! a snapshot taken under the lock, never while holding it, so a slow
//! discoverer cannot stall unrelated registrations.

use junction_core::{ConnId, Connection};
use junction_protocol::{Host, Message, RCode, ServiceOptype, ServiceRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A connection hosting one or more methods.
struct Provider {
    conn: Arc<Connection>,
    host: Host,
    methods: Mutex<Vec<String>>,
}

impl Provider {
    fn new(conn: Arc<Connection>, host: Host) -> Self {
        Self {
            conn,
            host,
            methods: Mutex::new(Vec::new()),
        }
    }

    fn append_method(&self, method: &str) {
        let mut methods = self.methods.lock().unwrap();
        if !methods.iter().any(|m| m == method) {
            methods.push(method.to_string());
        }
    }
}

#[derive(Default)]
struct ProviderIndex {
    /// Per-method provider list in registration order.
    by_method: HashMap<String, Vec<(ConnId, Arc<Provider>)>>,
    by_conn: HashMap<ConnId, Arc<Provider>>,
}

struct ProviderManager {
    inner: Mutex<ProviderIndex>,
}

impl ProviderManager {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ProviderIndex::default()),
        }
    }

    fn add_provider(&self, conn: &Arc<Connection>, host: &Host, method: &str) {
        let provider = {
            let mut index = self.inner.lock().unwrap();
            let provider = index
                .by_conn
                .entry(conn.id())
                .or_insert_with(|| Arc::new(Provider::new(conn.clone(), host.clone())))
                .clone();
            let providers = index.by_method.entry(method.to_string()).or_default();
            if !providers.iter().any(|(id, _)| *id == conn.id()) {
                providers.push((conn.id(), provider.clone()));
            }
            provider
        };
        provider.append_method(method);
    }

    fn get_provider(&self, conn_id: ConnId) -> Option<Arc<Provider>> {
        self.inner.lock().unwrap().by_conn.get(&conn_id).cloned()
    }

    fn del_provider(&self, conn_id: ConnId) {
        let mut index = self.inner.lock().unwrap();
        let Some(provider) = index.by_conn.remove(&conn_id) else {
            return;
        };
        let methods = provider.methods.lock().unwrap().clone();
        for method in &methods {
            if let Some(providers) = index.by_method.get_mut(method) {
                providers.retain(|(id, _)| *id != conn_id);
                if providers.is_empty() {
                    index.by_method.remove(method);
                }
            }
        }
    }

    /// Current hosts for `method`, in registration order.
    fn method_hosts(&self, method: &str) -> Vec<Host> {
        self.inner
            .lock()
            .unwrap()
            .by_method
            .get(method)
            .map(|providers| providers.iter().map(|(_, p)| p.host.clone()).collect())
            .unwrap_or_default()
    }
}

/// A connection interested in ONLINE/OFFLINE events for a set of methods.
struct Discoverer {
    conn: Arc<Connection>,
    methods: Mutex<Vec<String>>,
}

impl Discoverer {
    fn new(conn: Arc<Connection>) -> Self {
        Self {
            conn,
            methods: Mutex::new(Vec::new()),
        }
    }

    fn append_method(&self, method: &str) {
        let mut methods = self.methods.lock().unwrap();
        if !methods.iter().any(|m| m == method) {
            methods.push(method.to_string());
        }
    }
}

#[derive(Default)]
struct DiscovererIndex {
    by_method: HashMap<String, Vec<(ConnId, Arc<Discoverer>)>>,
    by_conn: HashMap<ConnId, Arc<Discoverer>>,
}

struct DiscovererManager {
    inner: Mutex<DiscovererIndex>,
}

impl DiscovererManager {
    fn new() -> Self {
        Self {
            inner: Mutex::new(DiscovererIndex::default()),
        }
    }

    fn add_discoverer(&self, conn: &Arc<Connection>, method: &str) {
        let discoverer = {
            let mut index = self.inner.lock().unwrap();
            let discoverer = index
                .by_conn
                .entry(conn.id())
                .or_insert_with(|| Arc::new(Discoverer::new(conn.clone())))
                .clone();
            let discoverers = index.by_method.entry(method.to_string()).or_default();
            if !discoverers.iter().any(|(id, _)| *id == conn.id()) {
                discoverers.push((conn.id(), discoverer.clone()));
            }
            discoverer
        };
        discoverer.append_method(method);
    }

    fn del_discoverer(&self, conn_id: ConnId) {
        let mut index = self.inner.lock().unwrap();
        let Some(discoverer) = index.by_conn.remove(&conn_id) else {
            return;
        };
        let methods = discoverer.methods.lock().unwrap().clone();
        for method in &methods {
            if let Some(discoverers) = index.by_method.get_mut(method) {
                discoverers.retain(|(id, _)| *id != conn_id);
                if discoverers.is_empty() {
                    index.by_method.remove(method);
                }
            }
        }
    }

    fn online_notify(&self, method: &str, host: &Host) {
        self.notify(method, host, ServiceOptype::Online);
    }

    fn offline_notify(&self, method: &str, host: &Host) {
        self.notify(method, host, ServiceOptype::Offline);
    }

    fn notify(&self, method: &str, host: &Host, optype: ServiceOptype) {
        // Snapshot under the lock, send outside it.
        let targets: Vec<Arc<Connection>> = {
            let index = self.inner.lock().unwrap();
            index
                .by_method
                .get(method)
                .map(|discoverers| discoverers.iter().map(|(_, d)| d.conn.clone()).collect())
                .unwrap_or_default()
        };
        if targets.is_empty() {
            return;
        }

        let msg = Message::service_request(
            Uuid::new_v4().to_string(),
            method,
            optype,
            Some(host.clone()),
        );
        for conn in targets {
            if let Err(e) = conn.send(msg.clone()) {
                // Best effort: the discoverer may be closing concurrently.
                tracing::warn!(
                    "failed to push {:?} for {} to {}: {}",
                    optype,
                    method,
                    conn.peer_addr(),
                    e
                );
            }
        }
    }
}

/// Registry-server state: providers and discoverers with push notifications.
pub struct PdManager {
    providers: ProviderManager,
    discoverers: DiscovererManager,
}

impl PdManager {
    pub fn new() -> Self {
        Self {
            providers: ProviderManager::new(),
            discoverers: DiscovererManager::new(),
        }
    }

    /// Dispatcher hook for `REQ_SERVICE`.
    pub fn on_service_request(&self, conn: &Arc<Connection>, rid: String, req: ServiceRequest) {
        match req.optype {
            ServiceOptype::Registry => {
                let Some(host) = req.host else {
                    return self.respond(conn, rid, RCode::InvalidMsg, ServiceOptype::Unknown, None, None);
                };
                tracing::info!("{} registers method {}", host, req.method);
                self.providers.add_provider(conn, &host, &req.method);
                self.discoverers.online_notify(&req.method, &host);
                self.respond(conn, rid, RCode::Ok, ServiceOptype::Registry, None, None);
            }
            ServiceOptype::Discovery => {
                tracing::info!("[{}] discovery for {}", conn.peer_addr(), req.method);
                // Register interest first so the discoverer gets ONLINE
                // events even when the method has no providers yet.
                self.discoverers.add_discoverer(conn, &req.method);
                let hosts = self.providers.method_hosts(&req.method);
                if hosts.is_empty() {
                    self.respond(
                        conn,
                        rid,
                        RCode::NotFoundService,
                        ServiceOptype::Discovery,
                        None,
                        None,
                    );
                } else {
                    self.respond(
                        conn,
                        rid,
                        RCode::Ok,
                        ServiceOptype::Discovery,
                        Some(req.method),
                        Some(hosts),
                    );
                }
            }
            other => {
                tracing::error!("service request with invalid optype {:?}", other);
                self.respond(conn, rid, RCode::InvalidOptype, ServiceOptype::Unknown, None, None);
            }
        }
    }

    /// Connection close hook: OFFLINE pushes for a departed provider, then
    /// removal from both manager indices.
    pub fn on_conn_shutdown(&self, conn: &Arc<Connection>) {
        if let Some(provider) = self.providers.get_provider(conn.id()) {
            tracing::info!("provider {} offline", provider.host);
            let methods = provider.methods.lock().unwrap().clone();
            for method in &methods {
                self.discoverers.offline_notify(method, &provider.host);
            }
            self.providers.del_provider(conn.id());
        }
        self.discoverers.del_discoverer(conn.id());
    }

    fn respond(
        &self,
        conn: &Arc<Connection>,
        rid: String,
        rcode: RCode,
        optype: ServiceOptype,
        method: Option<String>,
        host: Option<Vec<Host>>,
    ) {
        let msg = Message::service_response(rid, rcode, optype, method, host);
        if let Err(e) = conn.send(msg) {
            tracing::warn!("[{}] failed to send service response: {}", conn.peer_addr(), e);
        }
    }
}

impl Default for PdManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::Dispatcher;
    use junction_protocol::{Body, Decoder};
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    /// A peer-side test socket paired with a decoder that persists across
    /// `read_message` calls, so bytes for a message that arrives alongside
    /// (but after) the one being decoded aren't dropped when the read
    /// returns more than one frame's worth of data at once.
    struct PeerConn {
        stream: TcpStream,
        decoder: Decoder,
    }

    async fn test_conn() -> (Arc<Connection>, PeerConn) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let conn = junction_core::spawn(stream, Arc::new(Dispatcher::new()), Vec::new());
        (
            conn,
            PeerConn {
                stream: peer,
                decoder: Decoder::new(),
            },
        )
    }

    async fn read_message(peer: &mut PeerConn) -> Message {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(msg) = peer.decoder.decode_message().unwrap() {
                return msg;
            }
            let n = peer.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed early");
            peer.decoder.extend(&buf[..n]);
        }
    }

    fn registry_req(method: &str, host: Host) -> ServiceRequest {
        ServiceRequest {
            method: method.into(),
            optype: ServiceOptype::Registry,
            host: Some(host),
        }
    }

    fn discovery_req(method: &str) -> ServiceRequest {
        ServiceRequest {
            method: method.into(),
            optype: ServiceOptype::Discovery,
            host: None,
        }
    }

    #[tokio::test]
    async fn test_registry_then_discovery() {
        let pd = PdManager::new();
        let (provider, mut provider_peer) = test_conn().await;
        let (discoverer, mut discoverer_peer) = test_conn().await;

        pd.on_service_request(
            &provider,
            "r-1".into(),
            registry_req("Echo", Host::new("127.0.0.1", 9091)),
        );
        let reply = read_message(&mut provider_peer).await;
        match reply.body {
            Body::ServiceResponse(rsp) => {
                assert_eq!(rsp.rcode, RCode::Ok);
                assert_eq!(rsp.optype, ServiceOptype::Registry);
            }
            other => panic!("unexpected body: {other:?}"),
        }

        pd.on_service_request(&discoverer, "r-2".into(), discovery_req("Echo"));
        let reply = read_message(&mut discoverer_peer).await;
        assert_eq!(reply.rid, "r-2");
        match reply.body {
            Body::ServiceResponse(rsp) => {
                assert_eq!(rsp.rcode, RCode::Ok);
                assert_eq!(rsp.method.as_deref(), Some("Echo"));
                assert_eq!(rsp.host.unwrap(), vec![Host::new("127.0.0.1", 9091)]);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_discovery_without_providers_preserves_discoverer() {
        let pd = PdManager::new();
        let (provider, mut provider_peer) = test_conn().await;
        let (discoverer, mut discoverer_peer) = test_conn().await;

        pd.on_service_request(&discoverer, "r-1".into(), discovery_req("Echo"));
        let reply = read_message(&mut discoverer_peer).await;
        match reply.body {
            Body::ServiceResponse(rsp) => assert_eq!(rsp.rcode, RCode::NotFoundService),
            other => panic!("unexpected body: {other:?}"),
        }

        // A later registration must still reach the preserved discoverer.
        pd.on_service_request(
            &provider,
            "r-2".into(),
            registry_req("Echo", Host::new("127.0.0.1", 9091)),
        );
        let _registry_ok = read_message(&mut provider_peer).await;
        let push = read_message(&mut discoverer_peer).await;
        match push.body {
            Body::ServiceRequest(req) => {
                assert_eq!(req.optype, ServiceOptype::Online);
                assert_eq!(req.method, "Echo");
                assert_eq!(req.host.unwrap().port, 9091);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hosts_listed_in_registration_order() {
        let pd = PdManager::new();
        let (p1, mut p1_peer) = test_conn().await;
        let (p2, mut p2_peer) = test_conn().await;
        let (discoverer, mut discoverer_peer) = test_conn().await;

        pd.on_service_request(&p1, "r-1".into(), registry_req("Echo", Host::new("127.0.0.1", 9091)));
        read_message(&mut p1_peer).await;
        pd.on_service_request(&p2, "r-2".into(), registry_req("Echo", Host::new("127.0.0.1", 9092)));
        read_message(&mut p2_peer).await;

        pd.on_service_request(&discoverer, "r-3".into(), discovery_req("Echo"));
        let reply = read_message(&mut discoverer_peer).await;
        match reply.body {
            Body::ServiceResponse(rsp) => {
                let ports: Vec<u16> = rsp.host.unwrap().iter().map(|h| h.port).collect();
                assert_eq!(ports, [9091, 9092]);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_provider_shutdown_pushes_offline_per_method() {
        let pd = PdManager::new();
        let (provider, mut provider_peer) = test_conn().await;
        let (discoverer, mut discoverer_peer) = test_conn().await;

        let host = Host::new("127.0.0.1", 9091);
        pd.on_service_request(&provider, "r-1".into(), registry_req("Echo", host.clone()));
        read_message(&mut provider_peer).await;
        pd.on_service_request(&provider, "r-2".into(), registry_req("Add", host.clone()));
        read_message(&mut provider_peer).await;

        pd.on_service_request(&discoverer, "r-3".into(), discovery_req("Echo"));
        read_message(&mut discoverer_peer).await;
        pd.on_service_request(&discoverer, "r-4".into(), discovery_req("Add"));
        read_message(&mut discoverer_peer).await;

        pd.on_conn_shutdown(&provider);

        let mut offline_methods = Vec::new();
        for _ in 0..2 {
            let push = read_message(&mut discoverer_peer).await;
            match push.body {
                Body::ServiceRequest(req) => {
                    assert_eq!(req.optype, ServiceOptype::Offline);
                    assert_eq!(req.host.as_ref().unwrap(), &host);
                    offline_methods.push(req.method);
                }
                other => panic!("unexpected body: {other:?}"),
            }
        }
        offline_methods.sort();
        assert_eq!(offline_methods, ["Add", "Echo"]);

        // The departed provider no longer resolves.
        assert!(pd.providers.method_hosts("Echo").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_optype_rejected() {
        let pd = PdManager::new();
        let (conn, mut peer) = test_conn().await;

        pd.on_service_request(
            &conn,
            "r-1".into(),
            ServiceRequest {
                method: "Echo".into(),
                optype: ServiceOptype::Online,
                host: Some(Host::new("127.0.0.1", 9091)),
            },
        );
        let reply = read_message(&mut peer).await;
        match reply.body {
            Body::ServiceResponse(rsp) => {
                assert_eq!(rsp.rcode, RCode::InvalidOptype);
                assert_eq!(rsp.optype, ServiceOptype::Unknown);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
