//! Type-dispatched routing of inbound messages.

use crate::connection::Connection;
use junction_protocol::{
    Body, MType, Message, RpcRequest, RpcResponse, ServiceRequest, ServiceResponse, TopicRequest,
    TopicResponse,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Handler = Arc<dyn Fn(&Arc<Connection>, Message) + Send + Sync>;

/// Conversion from the message envelope into the typed view a handler takes.
pub trait FromMessage: Sized {
    fn from_message(msg: Message) -> Option<Self>;
}

macro_rules! impl_from_message {
    ($ty:ident) => {
        impl FromMessage for $ty {
            fn from_message(msg: Message) -> Option<Self> {
                match msg.body {
                    Body::$ty(body) => Some(body),
                    _ => None,
                }
            }
        }
    };
}

impl_from_message!(RpcRequest);
impl_from_message!(RpcResponse);
impl_from_message!(TopicRequest);
impl_from_message!(TopicResponse);
impl_from_message!(ServiceRequest);
impl_from_message!(ServiceResponse);

/// Routes each inbound message to the handler registered for its type.
///
/// Registration and lookup are serialized by one lock; the handler itself
/// runs outside it. A message whose type has no handler is a protocol
/// violation and shuts the connection down.
pub struct Dispatcher {
    handlers: Mutex<HashMap<MType, Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a typed handler for `mtype`. The stored closure converts
    /// the envelope down to `T` before invoking `handler` with the request
    /// id; a body that does not match `T` shuts the connection down.
    pub fn register<T, F>(&self, mtype: MType, handler: F)
    where
        T: FromMessage + 'static,
        F: Fn(&Arc<Connection>, String, T) + Send + Sync + 'static,
    {
        let wrapped: Handler = Arc::new(move |conn, msg| {
            let rid = msg.rid.clone();
            match T::from_message(msg) {
                Some(typed) => handler(conn, rid, typed),
                None => {
                    tracing::error!(
                        "[{}] message body does not match its type tag (rid={})",
                        conn.peer_addr(),
                        rid
                    );
                    conn.shutdown();
                }
            }
        });
        self.handlers.lock().unwrap().insert(mtype, wrapped);
    }

    /// Registers a handler that receives the whole envelope. Used where the
    /// consumer correlates on the request id rather than the body shape.
    pub fn register_raw<F>(&self, mtype: MType, handler: F)
    where
        F: Fn(&Arc<Connection>, Message) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(mtype, Arc::new(handler));
    }

    /// Routes `msg` to its handler, or shuts the connection down if none is
    /// registered for the type.
    pub fn dispatch(&self, conn: &Arc<Connection>, msg: Message) {
        let handler = self.handlers.lock().unwrap().get(&msg.mtype()).cloned();
        match handler {
            Some(handler) => handler(conn, msg),
            None => {
                tracing::error!(
                    "[{}] message with unhandled type {:?}",
                    conn.peer_addr(),
                    msg.mtype()
                );
                conn.shutdown();
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
