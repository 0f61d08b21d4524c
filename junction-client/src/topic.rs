//! Topic operations and inbound publish delivery, client side.

use crate::error::ClientError;
use crate::requestor::Requestor;
use junction_core::Connection;
use junction_protocol::{Body, Message, TopicOptype, TopicRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Invoked with `(topic_key, topic_msg)` for each inbound publication.
pub type SubscribeCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Performs topic operations against the server and routes inbound
/// publications to the locally registered callbacks.
pub struct TopicAgent {
    requestor: Arc<Requestor>,
    callbacks: Mutex<HashMap<String, SubscribeCallback>>,
}

impl TopicAgent {
    pub fn new(requestor: Arc<Requestor>) -> Self {
        Self {
            requestor,
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create(&self, conn: &Arc<Connection>, key: &str) -> Result<(), ClientError> {
        self.common_request(conn, key, TopicOptype::Create, None).await
    }

    pub async fn remove(&self, conn: &Arc<Connection>, key: &str) -> Result<(), ClientError> {
        self.common_request(conn, key, TopicOptype::Remove, None).await
    }

    /// Subscribes to `key`. The callback is registered before the request
    /// goes out so a publication racing the response is not lost, and is
    /// rolled back if the server rejects the subscription.
    pub async fn subscribe(
        &self,
        conn: &Arc<Connection>,
        key: &str,
        cb: SubscribeCallback,
    ) -> Result<(), ClientError> {
        self.callbacks.lock().unwrap().insert(key.to_string(), cb);
        if let Err(e) = self.common_request(conn, key, TopicOptype::Subscribe, None).await {
            self.callbacks.lock().unwrap().remove(key);
            return Err(e);
        }
        Ok(())
    }

    pub async fn cancel(&self, conn: &Arc<Connection>, key: &str) -> Result<(), ClientError> {
        self.callbacks.lock().unwrap().remove(key);
        self.common_request(conn, key, TopicOptype::Cancel, None).await
    }

    pub async fn publish(
        &self,
        conn: &Arc<Connection>,
        key: &str,
        msg: &str,
    ) -> Result<(), ClientError> {
        self.common_request(conn, key, TopicOptype::Publish, Some(msg.to_string()))
            .await
    }

    /// Dispatcher hook for publications pushed by the server.
    pub fn on_publish(&self, req: TopicRequest) {
        if req.optype != TopicOptype::Publish {
            tracing::error!(
                "unexpected topic optype {:?} pushed for {}",
                req.optype,
                req.topic_key
            );
            return;
        }
        let cb = self.callbacks.lock().unwrap().get(&req.topic_key).cloned();
        match cb {
            Some(cb) => cb(&req.topic_key, req.topic_msg.as_deref().unwrap_or("")),
            None => {
                tracing::warn!("publication for {} without a local subscription", req.topic_key)
            }
        }
    }

    async fn common_request(
        &self,
        conn: &Arc<Connection>,
        key: &str,
        optype: TopicOptype,
        msg: Option<String>,
    ) -> Result<(), ClientError> {
        let req = Message::topic_request(Uuid::new_v4().to_string(), key, optype, msg);
        let reply = self.requestor.send_await(conn, req).await?;
        match reply.body {
            Body::TopicResponse(rsp) if rsp.rcode.is_ok() => Ok(()),
            Body::TopicResponse(rsp) => Err(ClientError::Rejected { rcode: rsp.rcode }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
