//! Topics, subscribers and fan-out, server side.
//!
//! A Topic owns its subscriber set and a Subscriber owns its topic-key set,
//! so both a REMOVE and a connection close can tear down the other side
//! cheaply. Fan-out sends happen from a snapshot, never under a lock.

use junction_core::{ConnId, Connection};
use junction_protocol::{Body, Message, RCode, TopicOptype, TopicRequest};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

struct Subscriber {
    conn: Arc<Connection>,
    topics: Mutex<HashSet<String>>,
}

impl Subscriber {
    fn new(conn: Arc<Connection>) -> Self {
        Self {
            conn,
            topics: Mutex::new(HashSet::new()),
        }
    }

    fn append_topic(&self, key: &str) {
        self.topics.lock().unwrap().insert(key.to_string());
    }

    fn remove_topic(&self, key: &str) {
        self.topics.lock().unwrap().remove(key);
    }
}

struct Topic {
    subscribers: Mutex<HashMap<ConnId, Arc<Subscriber>>>,
}

impl Topic {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn append_subscriber(&self, subscriber: Arc<Subscriber>) {
        self.subscribers
            .lock()
            .unwrap()
            .insert(subscriber.conn.id(), subscriber);
    }

    fn remove_subscriber(&self, conn_id: ConnId) {
        self.subscribers.lock().unwrap().remove(&conn_id);
    }

    fn subscriber_arcs(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.lock().unwrap().values().cloned().collect()
    }

    fn subscriber_conns(&self) -> Vec<Arc<Connection>> {
        self.subscribers
            .lock()
            .unwrap()
            .values()
            .map(|s| s.conn.clone())
            .collect()
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[derive(Default)]
struct TopicIndex {
    topics: HashMap<String, Arc<Topic>>,
    subscribers: HashMap<ConnId, Arc<Subscriber>>,
}

/// Server-side topic state: named topics, per-connection subscribers and
/// publish fan-out.
pub struct TopicManager {
    inner: Mutex<TopicIndex>,
}

impl TopicManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TopicIndex::default()),
        }
    }

    /// Dispatcher hook for `REQ_TOPIC`. Every optype answers with exactly one
    /// `RSP_TOPIC` carrying the derived status.
    pub fn on_topic_request(&self, conn: &Arc<Connection>, rid: String, req: TopicRequest) {
        let rcode = match req.optype {
            TopicOptype::Create => self.topic_create(&req),
            TopicOptype::Remove => self.topic_remove(&req),
            TopicOptype::Subscribe => self.topic_subscribe(conn, &req),
            TopicOptype::Cancel => self.topic_cancel(conn, &req),
            TopicOptype::Publish => self.topic_publish(&rid, &req),
        };
        let msg = Message::topic_response(rid, rcode);
        if let Err(e) = conn.send(msg) {
            tracing::warn!("[{}] failed to send topic response: {}", conn.peer_addr(), e);
        }
    }

    /// Connection close hook: unsubscribe from every owned topic.
    pub fn on_conn_shutdown(&self, conn: &Arc<Connection>) {
        let topics: Vec<Arc<Topic>> = {
            let mut index = self.inner.lock().unwrap();
            let Some(subscriber) = index.subscribers.remove(&conn.id()) else {
                return;
            };
            let keys: Vec<String> = subscriber.topics.lock().unwrap().iter().cloned().collect();
            keys.iter()
                .filter_map(|key| index.topics.get(key).cloned())
                .collect()
        };
        for topic in topics {
            topic.remove_subscriber(conn.id());
        }
    }

    fn topic_create(&self, req: &TopicRequest) -> RCode {
        let mut index = self.inner.lock().unwrap();
        index
            .topics
            .entry(req.topic_key.clone())
            .or_insert_with(|| Arc::new(Topic::new()));
        // Creating an existing topic is a no-op.
        RCode::Ok
    }

    fn topic_remove(&self, req: &TopicRequest) -> RCode {
        let subscribers = {
            let mut index = self.inner.lock().unwrap();
            let Some(topic) = index.topics.remove(&req.topic_key) else {
                return RCode::NotFoundTopic;
            };
            topic.subscriber_arcs()
        };
        for subscriber in subscribers {
            subscriber.remove_topic(&req.topic_key);
        }
        tracing::info!("topic {} removed", req.topic_key);
        RCode::Ok
    }

    fn topic_subscribe(&self, conn: &Arc<Connection>, req: &TopicRequest) -> RCode {
        let (topic, subscriber) = {
            let mut index = self.inner.lock().unwrap();
            let Some(topic) = index.topics.get(&req.topic_key).cloned() else {
                return RCode::NotFoundTopic;
            };
            let subscriber = index
                .subscribers
                .entry(conn.id())
                .or_insert_with(|| Arc::new(Subscriber::new(conn.clone())))
                .clone();
            (topic, subscriber)
        };
        topic.append_subscriber(subscriber.clone());
        subscriber.append_topic(&req.topic_key);
        RCode::Ok
    }

    fn topic_cancel(&self, conn: &Arc<Connection>, req: &TopicRequest) -> RCode {
        let (topic, subscriber) = {
            let index = self.inner.lock().unwrap();
            (
                index.topics.get(&req.topic_key).cloned(),
                index.subscribers.get(&conn.id()).cloned(),
            )
        };
        // Both removals are no-ops when the side is already gone.
        if let Some(subscriber) = &subscriber {
            subscriber.remove_topic(&req.topic_key);
        }
        if let (Some(topic), Some(_)) = (topic, subscriber) {
            topic.remove_subscriber(conn.id());
        }
        RCode::Ok
    }

    fn topic_publish(&self, rid: &str, req: &TopicRequest) -> RCode {
        let topic = {
            let index = self.inner.lock().unwrap();
            index.topics.get(&req.topic_key).cloned()
        };
        let Some(topic) = topic else {
            return RCode::NotFoundTopic;
        };

        // The original request is forwarded as-is, publisher included when
        // it subscribed to its own topic.
        let targets = topic.subscriber_conns();
        let msg = Message::new(rid.to_string(), Body::TopicRequest(req.clone()));
        for conn in targets {
            if let Err(e) = conn.send(msg.clone()) {
                tracing::warn!(
                    "failed to forward publication on {} to {}: {}",
                    req.topic_key,
                    conn.peer_addr(),
                    e
                );
            }
        }
        RCode::Ok
    }

    #[cfg(test)]
    fn topic_subscriber_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .topics
            .get(key)
            .map(|t| t.subscriber_count())
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn has_topic(&self, key: &str) -> bool {
        self.inner.lock().unwrap().topics.contains_key(key)
    }
}

impl Default for TopicManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::Dispatcher;
    use junction_protocol::Decoder;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn test_conn() -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let conn = junction_core::spawn(stream, Arc::new(Dispatcher::new()), Vec::new());
        (conn, peer)
    }

    async fn read_message(peer: &mut TcpStream) -> Message {
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = peer.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed early");
            decoder.extend(&buf[..n]);
            if let Some(msg) = decoder.decode_message().unwrap() {
                return msg;
            }
        }
    }

    async fn expect_rcode(peer: &mut TcpStream, rcode: RCode) {
        let msg = read_message(peer).await;
        match msg.body {
            Body::TopicResponse(rsp) => assert_eq!(rsp.rcode, rcode),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    fn request(key: &str, optype: TopicOptype, msg: Option<&str>) -> TopicRequest {
        TopicRequest {
            topic_key: key.into(),
            optype,
            topic_msg: msg.map(|s| s.to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let manager = TopicManager::new();
        let (conn, mut peer) = test_conn().await;

        manager.on_topic_request(&conn, "r-1".into(), request("news", TopicOptype::Create, None));
        expect_rcode(&mut peer, RCode::Ok).await;
        manager.on_topic_request(&conn, "r-2".into(), request("news", TopicOptype::Create, None));
        expect_rcode(&mut peer, RCode::Ok).await;
        assert!(manager.has_topic("news"));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_topic() {
        let manager = TopicManager::new();
        let (conn, mut peer) = test_conn().await;

        manager.on_topic_request(&conn, "r-1".into(), request("ghost", TopicOptype::Subscribe, None));
        expect_rcode(&mut peer, RCode::NotFoundTopic).await;
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_keeps_one_entry() {
        let manager = TopicManager::new();
        let (conn, mut peer) = test_conn().await;

        manager.on_topic_request(&conn, "r-1".into(), request("news", TopicOptype::Create, None));
        expect_rcode(&mut peer, RCode::Ok).await;
        manager.on_topic_request(&conn, "r-2".into(), request("news", TopicOptype::Subscribe, None));
        expect_rcode(&mut peer, RCode::Ok).await;
        manager.on_topic_request(&conn, "r-3".into(), request("news", TopicOptype::Subscribe, None));
        expect_rcode(&mut peer, RCode::Ok).await;

        assert_eq!(manager.topic_subscriber_count("news"), 1);
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_subscribers() {
        let manager = TopicManager::new();
        let (sub_a, mut peer_a) = test_conn().await;
        let (sub_b, mut peer_b) = test_conn().await;
        let (publisher, mut peer_pub) = test_conn().await;

        manager.on_topic_request(&sub_a, "r-1".into(), request("news", TopicOptype::Create, None));
        expect_rcode(&mut peer_a, RCode::Ok).await;
        manager.on_topic_request(&sub_a, "r-2".into(), request("news", TopicOptype::Subscribe, None));
        expect_rcode(&mut peer_a, RCode::Ok).await;
        manager.on_topic_request(&sub_b, "r-3".into(), request("news", TopicOptype::Subscribe, None));
        expect_rcode(&mut peer_b, RCode::Ok).await;

        manager.on_topic_request(
            &publisher,
            "r-4".into(),
            request("news", TopicOptype::Publish, Some("hi")),
        );
        expect_rcode(&mut peer_pub, RCode::Ok).await;

        for peer in [&mut peer_a, &mut peer_b] {
            let push = read_message(peer).await;
            match push.body {
                Body::TopicRequest(req) => {
                    assert_eq!(req.optype, TopicOptype::Publish);
                    assert_eq!(req.topic_key, "news");
                    assert_eq!(req.topic_msg.as_deref(), Some("hi"));
                }
                other => panic!("unexpected body: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_publish_unknown_topic() {
        let manager = TopicManager::new();
        let (conn, mut peer) = test_conn().await;

        manager.on_topic_request(
            &conn,
            "r-1".into(),
            request("ghost", TopicOptype::Publish, Some("hi")),
        );
        expect_rcode(&mut peer, RCode::NotFoundTopic).await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_topic_is_ok() {
        let manager = TopicManager::new();
        let (conn, mut peer) = test_conn().await;

        manager.on_topic_request(&conn, "r-1".into(), request("ghost", TopicOptype::Cancel, None));
        expect_rcode(&mut peer, RCode::Ok).await;
    }

    #[tokio::test]
    async fn test_remove_detaches_subscribers() {
        let manager = TopicManager::new();
        let (conn, mut peer) = test_conn().await;

        manager.on_topic_request(&conn, "r-1".into(), request("news", TopicOptype::Create, None));
        expect_rcode(&mut peer, RCode::Ok).await;
        manager.on_topic_request(&conn, "r-2".into(), request("news", TopicOptype::Subscribe, None));
        expect_rcode(&mut peer, RCode::Ok).await;

        manager.on_topic_request(&conn, "r-3".into(), request("news", TopicOptype::Remove, None));
        expect_rcode(&mut peer, RCode::Ok).await;
        assert!(!manager.has_topic("news"));

        // The subscriber's own topic set forgot the key too.
        let index = manager.inner.lock().unwrap();
        let subscriber = index.subscribers.get(&conn.id()).unwrap();
        assert!(subscriber.topics.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_topic() {
        let manager = TopicManager::new();
        let (conn, mut peer) = test_conn().await;

        manager.on_topic_request(&conn, "r-1".into(), request("ghost", TopicOptype::Remove, None));
        expect_rcode(&mut peer, RCode::NotFoundTopic).await;
    }

    #[tokio::test]
    async fn test_conn_shutdown_unsubscribes_everywhere() {
        let manager = TopicManager::new();
        let (conn_a, mut peer_a) = test_conn().await;
        let (conn_b, mut peer_b) = test_conn().await;

        for (rid, key, optype) in [
            ("r-1", "news", TopicOptype::Create),
            ("r-2", "sport", TopicOptype::Create),
            ("r-3", "news", TopicOptype::Subscribe),
            ("r-4", "sport", TopicOptype::Subscribe),
        ] {
            manager.on_topic_request(&conn_a, rid.into(), request(key, optype, None));
            expect_rcode(&mut peer_a, RCode::Ok).await;
        }
        manager.on_topic_request(&conn_b, "r-5".into(), request("news", TopicOptype::Subscribe, None));
        expect_rcode(&mut peer_b, RCode::Ok).await;

        manager.on_conn_shutdown(&conn_a);

        assert_eq!(manager.topic_subscriber_count("news"), 1);
        assert_eq!(manager.topic_subscriber_count("sport"), 0);
        assert!(manager.inner.lock().unwrap().subscribers.get(&conn_a.id()).is_none());
    }
}
