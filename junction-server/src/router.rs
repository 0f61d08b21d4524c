//! RPC method routing with parameter and return-value validation.

use crate::error::ServerError;
use junction_core::Connection;
use junction_protocol::{Message, RCode, RpcRequest};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Value types a parameter or return value may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VType {
    Bool,
    Integral,
    Numeric,
    String,
    Array,
    Object,
}

impl VType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            VType::Bool => value.is_boolean(),
            VType::Integral => value.is_i64() || value.is_u64(),
            VType::Numeric => value.is_number(),
            VType::String => value.is_string(),
            VType::Array => value.is_array(),
            VType::Object => value.is_object(),
        }
    }
}

/// The business callback behind a method.
pub type ServiceHandler = Box<dyn Fn(&Value) -> Result<Value, ServerError> + Send + Sync>;

/// Binds a method name to its parameter schema, return type and handler.
pub struct ServiceDescribe {
    method: String,
    params: Vec<(String, VType)>,
    return_type: VType,
    handler: ServiceHandler,
}

impl ServiceDescribe {
    pub fn builder(method: impl Into<String>) -> ServiceDescribeBuilder {
        ServiceDescribeBuilder {
            method: method.into(),
            params: Vec::new(),
            return_type: VType::Object,
            handler: None,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Every declared field must be present and type-match; extra fields are
    /// allowed.
    pub fn param_check(&self, params: &Value) -> bool {
        for (name, vtype) in &self.params {
            match params.get(name) {
                Some(value) if vtype.matches(value) => {}
                Some(_) => {
                    tracing::error!("{}: parameter {} has the wrong type", self.method, name);
                    return false;
                }
                None => {
                    tracing::error!("{}: parameter {} is missing", self.method, name);
                    return false;
                }
            }
        }
        true
    }

    /// Runs the handler. A panic or a return value that misses the declared
    /// type is an internal error.
    pub fn call(&self, params: &Value) -> Result<Value, ServerError> {
        let result = catch_unwind(AssertUnwindSafe(|| (self.handler)(params)))
            .map_err(|_| ServerError::Handler(format!("handler for {} panicked", self.method)))??;
        if !self.return_type.matches(&result) {
            return Err(ServerError::Handler(format!(
                "handler for {} returned a value of the wrong type",
                self.method
            )));
        }
        Ok(result)
    }
}

/// Builder for [`ServiceDescribe`].
pub struct ServiceDescribeBuilder {
    method: String,
    params: Vec<(String, VType)>,
    return_type: VType,
    handler: Option<ServiceHandler>,
}

impl ServiceDescribeBuilder {
    /// Declares a parameter field. Order is kept for diagnostics.
    pub fn param(mut self, name: impl Into<String>, vtype: VType) -> Self {
        self.params.push((name.into(), vtype));
        self
    }

    pub fn returns(mut self, vtype: VType) -> Self {
        self.return_type = vtype;
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, ServerError> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> ServiceDescribe {
        let method = self.method.clone();
        ServiceDescribe {
            method: self.method,
            params: self.params,
            return_type: self.return_type,
            handler: self.handler.unwrap_or_else(|| {
                Box::new(move |_: &Value| {
                    Err(ServerError::Handler(format!("{method}: no handler bound")))
                })
            }),
        }
    }
}

/// Method registry.
pub struct ServiceManager {
    services: Mutex<HashMap<String, Arc<ServiceDescribe>>>,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, describe: ServiceDescribe) {
        self.services
            .lock()
            .unwrap()
            .insert(describe.method.clone(), Arc::new(describe));
    }

    pub fn select(&self, method: &str) -> Option<Arc<ServiceDescribe>> {
        self.services.lock().unwrap().get(method).cloned()
    }

    pub fn remove(&self, method: &str) {
        self.services.lock().unwrap().remove(method);
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes `REQ_RPC` messages to registered methods.
///
/// Every branch answers with exactly one `RSP_RPC` echoing the request id.
pub struct RpcRouter {
    services: ServiceManager,
}

impl RpcRouter {
    pub fn new() -> Self {
        Self {
            services: ServiceManager::new(),
        }
    }

    pub fn register_method(&self, describe: ServiceDescribe) {
        self.services.insert(describe);
    }

    /// Dispatcher hook for `REQ_RPC`.
    pub fn on_rpc_request(&self, conn: &Arc<Connection>, rid: String, req: RpcRequest) {
        let Some(service) = self.services.select(&req.method) else {
            tracing::error!("method {} not found (rid={})", req.method, rid);
            return self.respond(conn, rid, RCode::NotFoundService, Value::Null);
        };

        if !service.param_check(&req.params) {
            return self.respond(conn, rid, RCode::InvalidParams, Value::Null);
        }

        match service.call(&req.params) {
            Ok(result) => self.respond(conn, rid, RCode::Ok, result),
            Err(e) => {
                tracing::error!("method {} failed (rid={}): {}", req.method, rid, e);
                self.respond(conn, rid, RCode::InternalError, Value::Null)
            }
        }
    }

    fn respond(&self, conn: &Arc<Connection>, rid: String, rcode: RCode, result: Value) {
        let msg = Message::rpc_response(rid, rcode, result);
        if let Err(e) = conn.send(msg) {
            tracing::warn!("[{}] failed to send rpc response: {}", conn.peer_addr(), e);
        }
    }
}

impl Default for RpcRouter {
    fn default() -> Self {
        Self::new()
    }
}
