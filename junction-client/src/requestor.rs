//! Pending-request correlation table.
//!
//! Every outbound request is tracked under its request id until the matching
//! response arrives or the connection carrying it dies. Completion is
//! at-most-once: the descriptor is removed from the table atomically before
//! its sink fires.

use crate::error::ClientError;
use dashmap::DashMap;
use junction_core::{ConnId, Connection};
use junction_protocol::{MType, Message};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

type ResponseCallback = Box<dyn FnOnce(Message) + Send>;

enum ReplySink {
    Future(oneshot::Sender<Message>),
    Callback(Mutex<Option<ResponseCallback>>),
}

struct RequestDescribe {
    conn_id: ConnId,
    request_mtype: MType,
    sink: ReplySink,
}

impl RequestDescribe {
    fn complete(self, msg: Message) {
        match self.sink {
            ReplySink::Future(tx) => {
                // The waiter may have been dropped; nothing to deliver to.
                let _ = tx.send(msg);
            }
            ReplySink::Callback(cb) => {
                if let Some(cb) = cb.lock().unwrap().take() {
                    cb(msg);
                }
            }
        }
    }
}

/// Correlates responses to outstanding requests.
pub struct Requestor {
    pending: DashMap<String, RequestDescribe>,
}

impl Requestor {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Sends `req`, returning a future that resolves with the response.
    pub fn send(&self, conn: &Arc<Connection>, req: Message) -> Result<PendingReply, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.track_and_send(conn, req, ReplySink::Future(tx))?;
        Ok(PendingReply { rx })
    }

    /// Sends `req` and waits for the response.
    pub async fn send_await(
        &self,
        conn: &Arc<Connection>,
        req: Message,
    ) -> Result<Message, ClientError> {
        self.send(conn, req)?.wait().await
    }

    /// Sends `req`; `cb` is invoked with the response (or the synthetic
    /// disconnect reply) exactly once.
    pub fn send_with<F>(
        &self,
        conn: &Arc<Connection>,
        req: Message,
        cb: F,
    ) -> Result<(), ClientError>
    where
        F: FnOnce(Message) + Send + 'static,
    {
        self.track_and_send(conn, req, ReplySink::Callback(Mutex::new(Some(Box::new(cb)))))
    }

    fn track_and_send(
        &self,
        conn: &Arc<Connection>,
        req: Message,
        sink: ReplySink,
    ) -> Result<(), ClientError> {
        let rid = req.rid.clone();
        // The descriptor goes in before the bytes go out so a fast response
        // always finds it.
        self.pending.insert(
            rid.clone(),
            RequestDescribe {
                conn_id: conn.id(),
                request_mtype: req.mtype(),
                sink,
            },
        );
        if let Err(e) = conn.send(req) {
            self.pending.remove(&rid);
            return Err(e.into());
        }
        Ok(())
    }

    /// Dispatcher hook for response messages.
    pub fn on_response(&self, _conn: &Arc<Connection>, msg: Message) {
        match self.pending.remove(&msg.rid) {
            Some((_, describe)) => describe.complete(msg),
            None => {
                tracing::warn!("response {} has no outstanding request, dropping", msg.rid);
            }
        }
    }

    /// Completes every descriptor sent over `conn_id` with a synthetic
    /// DISCONNECTED reply. Wired as a connection close hook so blocked
    /// waiters are never leaked.
    pub fn fail_conn(&self, conn_id: ConnId) {
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().conn_id == conn_id)
            .map(|entry| entry.key().clone())
            .collect();

        for rid in stale {
            if let Some((rid, describe)) = self.pending.remove(&rid) {
                if let Some(reply) = Message::disconnected_reply(describe.request_mtype, rid) {
                    describe.complete(reply);
                }
            }
        }
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Requestor {
    fn default() -> Self {
        Self::new()
    }
}

/// A response yet to arrive.
pub struct PendingReply {
    rx: oneshot::Receiver<Message>,
}

impl PendingReply {
    /// Waits for the response. Fails only if the requestor itself goes away
    /// without completing the descriptor.
    pub async fn wait(self) -> Result<Message, ClientError> {
        self.rx.await.map_err(|_| ClientError::Disconnected)
    }
}
