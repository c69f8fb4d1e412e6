//! RPC routing.
//!
//! Handlers register under a `(module, name)` operation id. Each id binds
//! at most one handler at a time; a registration hands back a handle
//! whose close (or drop) frees the id for rebinding. Invocation clones
//! the handler out from under the lock, so a slow handler never blocks
//! registration or other invocations.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Identifies an RPC operation by owning module and local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
    pub module: String,
    pub name: String,
}

impl OperationId {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

/// Errors from RPC registration and invocation.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no handler registered for {operation}")]
    NotFound { operation: OperationId },

    #[error("operation {operation} is already bound")]
    AlreadyBound { operation: OperationId },

    #[error("handler for {operation} failed: {reason}")]
    HandlerFailed {
        operation: OperationId,
        reason: String,
    },
}

/// The boxed future an RPC handler returns.
pub type RpcFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;

/// An RPC implementation. `invoke` receives the operation's input
/// document and produces its output document.
pub trait RpcHandler: Send + Sync {
    fn invoke(&self, operation: &OperationId, input: Value) -> RpcFuture;
}

struct FnHandler<F> {
    f: F,
}

impl<F> RpcHandler for FnHandler<F>
where
    F: Fn(&OperationId, Value) -> Result<Value, RpcError> + Send + Sync,
{
    fn invoke(&self, operation: &OperationId, input: Value) -> RpcFuture {
        let result = (self.f)(operation, input);
        Box::pin(std::future::ready(result))
    }
}

/// Wraps a synchronous closure as an [`RpcHandler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn RpcHandler>
where
    F: Fn(&OperationId, Value) -> Result<Value, RpcError> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

struct RouterInner {
    handlers: RwLock<HashMap<OperationId, Arc<dyn RpcHandler>>>,
}

/// Routes RPC invocations to the handler bound to their operation id.
#[derive(Clone)]
pub struct RpcRouter {
    inner: Arc<RouterInner>,
}

impl Default for RpcRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcRouter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Binds a handler to an operation id.
    ///
    /// Fails if the id is already bound. The returned registration keeps
    /// the binding alive; closing or dropping it unbinds.
    pub fn register(
        &self,
        operation: OperationId,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<RpcRegistration, RpcError> {
        let mut handlers = self.inner.handlers.write();
        if handlers.contains_key(&operation) {
            return Err(RpcError::AlreadyBound { operation });
        }
        tracing::debug!("rpc {} registered", operation);
        handlers.insert(operation.clone(), handler);
        Ok(RpcRegistration {
            router: Arc::downgrade(&self.inner),
            operation: Some(operation),
        })
    }

    /// Invokes the handler bound to `operation` with `input`.
    pub async fn invoke(&self, operation: &OperationId, input: Value) -> Result<Value, RpcError> {
        let handler = {
            let handlers = self.inner.handlers.read();
            handlers
                .get(operation)
                .cloned()
                .ok_or_else(|| RpcError::NotFound {
                    operation: operation.clone(),
                })?
        };
        handler.invoke(operation, input).await
    }

    /// Operation ids currently bound, in no particular order.
    pub fn registered_operations(&self) -> Vec<OperationId> {
        self.inner.handlers.read().keys().cloned().collect()
    }
}

/// Keeps an RPC binding alive. Close is idempotent; dropping the
/// registration closes it.
#[derive(Debug)]
pub struct RpcRegistration {
    router: Weak<RouterInner>,
    operation: Option<OperationId>,
}

impl RpcRegistration {
    /// The operation this registration bound, until closed.
    pub fn operation(&self) -> Option<&OperationId> {
        self.operation.as_ref()
    }

    /// Unbinds the handler. Calling close twice is a no-op.
    pub fn close(&mut self) {
        let Some(operation) = self.operation.take() else {
            return;
        };
        if let Some(router) = self.router.upgrade() {
            router.handlers.write().remove(&operation);
            tracing::debug!("rpc {} unregistered", operation);
        }
    }
}

impl Drop for RpcRegistration {
    fn drop(&mut self) {
        self.close();
    }
}
