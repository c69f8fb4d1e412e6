//! Broker error types.

use confplane_store::StoreError;
use thiserror::Error;

/// Errors from the data broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("commit queue full: capacity {capacity} exceeded")]
    CapacityExceeded { capacity: usize },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("broker is shutting down")]
    ShuttingDown,

    #[error("broker stopped before the commit completed")]
    BrokerStopped,

    #[error("invalid broker configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl BrokerError {
    /// Returns whether the caller should retry with a fresh transaction.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BrokerError::Store(e) if e.is_conflict())
    }

    /// Returns whether the caller may retry the same submission with
    /// backoff.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, BrokerError::CapacityExceeded { .. })
    }
}
