//! Operation service aggregation.
//!
//! Operation services are the pluggable protocol extensions. Each one is
//! contributed through a factory that advertises the capabilities it
//! implements; the aggregator merges the advertised sets into the one
//! the server negotiates with. Two factories claiming the same
//! capability is a wiring mistake, so it fails loudly at registration
//! instead of silently shadowing one of them.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A capability URN advertised during session negotiation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(pub String);

impl Capability {
    pub fn new(urn: impl Into<String>) -> Self {
        Self(urn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error from operation service registration.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("capability {capability} is already advertised by a registered service")]
    DuplicateCapability { capability: Capability },
}

/// A source of operation services, advertising the capabilities its
/// services implement.
pub trait OperationServiceFactory: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Capabilities the factory's services implement.
    fn capabilities(&self) -> BTreeSet<Capability>;
}

/// A factory with a fixed capability set, for services whose surface is
/// known at construction time.
pub struct StaticOperationServiceFactory {
    name: String,
    capabilities: BTreeSet<Capability>,
}

impl StaticOperationServiceFactory {
    pub fn new(
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

impl OperationServiceFactory for StaticOperationServiceFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        self.capabilities.clone()
    }
}

struct AggregatorInner {
    factories: Vec<Arc<dyn OperationServiceFactory>>,
    advertised: BTreeSet<Capability>,
}

/// Merges the capability sets of every registered operation service
/// factory.
#[derive(Clone)]
pub struct OperationServiceAggregator {
    inner: Arc<RwLock<AggregatorInner>>,
}

impl Default for OperationServiceAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationServiceAggregator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(AggregatorInner {
                factories: Vec::new(),
                advertised: BTreeSet::new(),
            })),
        }
    }

    /// Registers a factory, folding its capabilities into the advertised
    /// set. Fails if any capability is already advertised, leaving the
    /// aggregator unchanged.
    pub fn register(&self, factory: Arc<dyn OperationServiceFactory>) -> Result<(), OpsError> {
        let capabilities = factory.capabilities();
        let mut inner = self.inner.write();
        for capability in &capabilities {
            if inner.advertised.contains(capability) {
                return Err(OpsError::DuplicateCapability {
                    capability: capability.clone(),
                });
            }
        }
        tracing::info!(
            "operation service '{}' registered with {} capabilities",
            factory.name(),
            capabilities.len()
        );
        inner.advertised.extend(capabilities);
        inner.factories.push(factory);
        Ok(())
    }

    /// The merged capability set across all registered factories.
    pub fn current_capabilities(&self) -> BTreeSet<Capability> {
        self.inner.read().advertised.clone()
    }

    /// Number of registered factories.
    pub fn factory_count(&self) -> usize {
        self.inner.read().factories.len()
    }
}
