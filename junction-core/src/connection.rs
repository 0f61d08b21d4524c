//! Connection handle and per-connection IO task.
//!
//! Both clients and servers drive sockets through [`spawn`]: one tokio task
//! per connection owns the stream, decodes inbound frames in order and hands
//! each message to the dispatcher, and drains an outbound queue so any task
//! holding the [`Connection`] handle can send without touching the socket.

use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use junction_protocol::{Decoder, Encoder, Message};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

/// Read buffer size for socket reads (8 KiB).
const READ_BUFFER_SIZE: usize = 8 * 1024;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Stable per-process connection identifier. Managers use it as a map key so
/// they never own the connection itself.
pub type ConnId = u64;

/// Hook invoked exactly once when a connection's IO task terminates.
pub type CloseHook = Box<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Shared handle to a live connection.
pub struct Connection {
    id: ConnId,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Message>,
    shutdown: broadcast::Sender<()>,
    connected: AtomicBool,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queues a message for transmission. Non-blocking; frames are written
    /// in queue order by the IO task.
    pub fn send(&self, msg: Message) -> Result<(), CoreError> {
        if !self.is_connected() {
            return Err(CoreError::Disconnected);
        }
        self.outbound.send(msg).map_err(|_| CoreError::Disconnected)
    }

    /// Asks the IO task to terminate. Idempotent.
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Spawns the IO task for `stream` and returns its handle.
///
/// The task runs until the peer closes, an IO or protocol error occurs, or
/// [`Connection::shutdown`] is called. On exit the close hooks run in
/// registration order; they are independent of each other.
pub fn spawn(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    close_hooks: Vec<CloseHook>,
) -> Arc<Connection> {
    let peer_addr = stream
        .peer_addr()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let conn = Arc::new(Connection {
        id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
        peer_addr,
        outbound: outbound_tx,
        shutdown: shutdown_tx,
        connected: AtomicBool::new(true),
    });

    let task_conn = conn.clone();
    tokio::spawn(async move {
        if let Err(e) = io_loop(stream, &task_conn, outbound_rx, shutdown_rx, &dispatcher).await {
            tracing::debug!("[{}] connection error: {}", task_conn.peer_addr(), e);
        }
        task_conn.connected.store(false, Ordering::SeqCst);
        for hook in &close_hooks {
            hook(&task_conn);
        }
    });

    conn
}

async fn io_loop(
    stream: TcpStream,
    conn: &Arc<Connection>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    mut shutdown_rx: broadcast::Receiver<()>,
    dispatcher: &Dispatcher,
) -> Result<(), CoreError> {
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            biased;

            maybe = outbound_rx.recv() => {
                match maybe {
                    Some(msg) => {
                        let bytes = Encoder::encode(&msg)?;
                        writer.write_all(&bytes).await?;
                    }
                    None => return Ok(()),
                }
            }

            _ = shutdown_rx.recv() => {
                tracing::debug!("[{}] shutdown requested", conn.peer_addr());
                return Ok(());
            }

            result = reader.read(&mut buf) => {
                let n = result?;
                if n == 0 {
                    tracing::debug!("[{}] connection closed by peer", conn.peer_addr());
                    return Ok(());
                }
                decoder.extend(&buf[..n]);
                // Frames are decoded and dispatched in arrival order; a
                // protocol violation tears the connection down.
                while let Some(msg) = decoder.decode_message()? {
                    dispatcher.dispatch(conn, msg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_protocol::{MType, RCode};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    async fn connected_pair(
        dispatcher: Arc<Dispatcher>,
        close_hooks: Vec<CloseHook>,
    ) -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        (spawn(server_side, dispatcher, close_hooks), client)
    }

    #[tokio::test]
    async fn test_inbound_messages_reach_dispatcher() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(Dispatcher::new());
        let sink = received.clone();
        dispatcher.register_raw(MType::ReqRpc, move |_conn, msg| {
            sink.lock().unwrap().push(msg.rid);
        });

        let (_conn, mut client) = connected_pair(dispatcher, Vec::new()).await;

        let msg = Message::rpc_request("r-1", "Add", json!({}));
        client
            .write_all(&Encoder::encode(&msg).unwrap())
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(*received.lock().unwrap(), vec!["r-1".to_string()]);
    }

    #[tokio::test]
    async fn test_send_writes_frame_to_peer() {
        let dispatcher = Arc::new(Dispatcher::new());
        let (conn, client) = connected_pair(dispatcher, Vec::new()).await;

        conn.send(Message::topic_response("r-2", RCode::Ok)).unwrap();

        let mut decoder = Decoder::new();
        let mut buf = [0u8; 1024];
        let mut client = client;
        loop {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed before frame arrived");
            decoder.extend(&buf[..n]);
            if let Some(msg) = decoder.decode_message().unwrap() {
                assert_eq!(msg.rid, "r-2");
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_close_hooks_run_on_peer_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hook: CloseHook = Box::new(move |conn| {
            let _ = tx.send(conn.id());
        });
        let dispatcher = Arc::new(Dispatcher::new());
        let (conn, client) = connected_pair(dispatcher, vec![hook]).await;

        drop(client);
        let closed_id = rx.recv().await.unwrap();
        assert_eq!(closed_id, conn.id());
        assert!(!conn.is_connected());
        assert!(conn
            .send(Message::topic_response("r", RCode::Ok))
            .is_err());
    }

    #[tokio::test]
    async fn test_shutdown_terminates_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hook: CloseHook = Box::new(move |_| {
            let _ = tx.send(());
        });
        let dispatcher = Arc::new(Dispatcher::new());
        let (conn, _client) = connected_pair(dispatcher, vec![hook]).await;

        conn.shutdown();
        rx.recv().await.unwrap();
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_protocol_violation_closes_connection() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hook: CloseHook = Box::new(move |_| {
            let _ = tx.send(());
        });
        let dispatcher = Arc::new(Dispatcher::new());
        let (_conn, mut client) = connected_pair(dispatcher, vec![hook]).await;

        // Frame with an unknown mtype tag.
        let mut junk = Vec::new();
        junk.extend_from_slice(&10u32.to_be_bytes());
        junk.extend_from_slice(&99u32.to_be_bytes());
        junk.extend_from_slice(&0u32.to_be_bytes());
        junk.extend_from_slice(b"{}");
        client.write_all(&junk).await.unwrap();

        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_conn_ids_are_unique() {
        let dispatcher = Arc::new(Dispatcher::new());
        let (a, _ca) = connected_pair(dispatcher.clone(), Vec::new()).await;
        let (b, _cb) = connected_pair(dispatcher, Vec::new()).await;
        assert_ne!(a.id(), b.id());
    }
}
