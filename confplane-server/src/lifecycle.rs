//! Ordered shutdown of server components.
//!
//! Components register in the order they start; shutdown closes them in
//! reverse, so nothing is torn down while something that depends on it
//! is still running. A close failure is logged and the remaining
//! components still close.

use crate::error::ServerError;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;

pub type CloseFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ServerError>> + Send + 'a>>;

/// A component with an orderly close.
pub trait ManagedResource: Send {
    /// Name used in shutdown logs.
    fn name(&self) -> &str;

    /// Closes the resource. Called at most once.
    fn close(&mut self) -> CloseFuture<'_>;
}

struct ClosureResource<F> {
    name: String,
    close: Option<F>,
}

impl<F, Fut> ManagedResource for ClosureResource<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<(), ServerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> CloseFuture<'_> {
        match self.close.take() {
            Some(f) => Box::pin(f()),
            None => Box::pin(std::future::ready(Ok(()))),
        }
    }
}

/// Tracks started components and closes them in reverse order.
pub struct LifecycleManager {
    resources: Mutex<Vec<Box<dyn ManagedResource>>>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(Vec::new()),
        }
    }

    /// Registers a resource. The most recently registered closes first.
    pub fn register(&self, resource: Box<dyn ManagedResource>) {
        tracing::debug!("lifecycle: registered '{}'", resource.name());
        self.resources.lock().push(resource);
    }

    /// Registers a close callback under a name.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, close: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ServerError>> + Send + 'static,
    {
        self.register(Box::new(ClosureResource {
            name: name.into(),
            close: Some(close),
        }));
    }

    /// Returns the number of registered resources still open.
    pub fn resource_count(&self) -> usize {
        self.resources.lock().len()
    }

    /// Closes every registered resource, newest first.
    ///
    /// Failures are logged, never escalated; a second call is a no-op.
    pub async fn shutdown(&self) {
        let mut resources = {
            let mut guard = self.resources.lock();
            std::mem::take(&mut *guard)
        };

        tracing::info!("lifecycle: closing {} resources", resources.len());
        while let Some(mut resource) = resources.pop() {
            let name = resource.name().to_string();
            tracing::info!("lifecycle: closing '{}'", name);
            if let Err(e) = resource.close().await {
                tracing::error!("lifecycle: close of '{}' failed: {}", name, e);
            }
        }
    }
}
