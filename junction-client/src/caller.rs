//! RPC invocation over the correlation table.

use crate::error::ClientError;
use crate::requestor::Requestor;
use junction_core::Connection;
use junction_protocol::{Body, Message};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Builds `REQ_RPC` messages and extracts results from their responses.
///
/// The three call shapes mirror the requestor's sinks; the future and
/// callback variants complete with the extracted result, not the raw
/// response.
pub struct RpcCaller {
    requestor: Arc<Requestor>,
}

impl RpcCaller {
    pub fn new(requestor: Arc<Requestor>) -> Self {
        Self { requestor }
    }

    /// Invokes `method` and waits for the result.
    pub async fn call(
        &self,
        conn: &Arc<Connection>,
        method: &str,
        params: Value,
    ) -> Result<Value, ClientError> {
        let req = Message::rpc_request(fresh_rid(), method, params);
        tracing::debug!("rpc call {} (rid={})", method, req.rid);
        let reply = self.requestor.send_await(conn, req).await?;
        extract_result(reply)
    }

    /// Invokes `method`, returning a future for the result.
    pub fn call_future(
        &self,
        conn: &Arc<Connection>,
        method: &str,
        params: Value,
    ) -> Result<RpcReply, ClientError> {
        let req = Message::rpc_request(fresh_rid(), method, params);
        let (tx, rx) = oneshot::channel();
        self.requestor.send_with(conn, req, move |msg| {
            let _ = tx.send(extract_result(msg));
        })?;
        Ok(RpcReply { rx })
    }

    /// Invokes `method`; `cb` receives the result exactly once.
    pub fn call_with<F>(
        &self,
        conn: &Arc<Connection>,
        method: &str,
        params: Value,
        cb: F,
    ) -> Result<(), ClientError>
    where
        F: FnOnce(Result<Value, ClientError>) + Send + 'static,
    {
        let req = Message::rpc_request(fresh_rid(), method, params);
        self.requestor.send_with(conn, req, move |msg| cb(extract_result(msg)))
    }
}

fn fresh_rid() -> String {
    Uuid::new_v4().to_string()
}

fn extract_result(msg: Message) -> Result<Value, ClientError> {
    match msg.body {
        Body::RpcResponse(rsp) => {
            if !rsp.rcode.is_ok() {
                return Err(ClientError::Rejected { rcode: rsp.rcode });
            }
            Ok(rsp.result)
        }
        _ => Err(ClientError::UnexpectedResponse),
    }
}

/// A result yet to arrive.
pub struct RpcReply {
    rx: oneshot::Receiver<Result<Value, ClientError>>,
}

impl RpcReply {
    pub async fn wait(self) -> Result<Value, ClientError> {
        self.rx.await.map_err(|_| ClientError::Disconnected)?
    }
}
