//! Data-store configuration.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};

/// Settings applied to both the CONFIGURATION and OPERATIONAL stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of change-notification forwarder workers per store.
    ///
    /// Fan-out preserves commit order, which requires a single forwarder
    /// per store; values above 1 are accepted for compatibility and
    /// clamped with a warning at store construction.
    pub max_data_change_executor_pool_size: usize,

    /// Queue capacity between the commit path and the notification
    /// forwarder. When full, the newest change is dropped and logged.
    pub max_data_change_executor_queue_size: usize,

    /// Queue capacity of each registered change listener. When full, the
    /// change is dropped for that listener and logged.
    pub max_data_change_listener_queue_size: usize,

    /// Store executor queue bound. The broker's single commit queue is
    /// what actually bounds outstanding writes; this field is validated
    /// and reported for compatibility with the store executor surface.
    pub max_data_store_executor_queue_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_data_change_executor_pool_size: 4,
            max_data_change_executor_queue_size: 2,
            max_data_change_listener_queue_size: 8,
            max_data_store_executor_queue_size: 10,
        }
    }
}

impl StoreConfig {
    /// Validates the configured ranges, failing fast on nonsense values.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_data_change_executor_pool_size == 0 {
            return Err(StoreError::InvalidConfig {
                reason: "max_data_change_executor_pool_size must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Effective forwarder input queue capacity (channels need at least 1).
    pub fn executor_queue_capacity(&self) -> usize {
        self.max_data_change_executor_queue_size.max(1)
    }

    /// Effective per-listener queue capacity (channels need at least 1).
    pub fn listener_queue_capacity(&self) -> usize {
        self.max_data_change_listener_queue_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_data_change_executor_pool_size, 4);
        assert_eq!(config.max_data_change_listener_queue_size, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let config = StoreConfig {
            max_data_change_executor_pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_effective_capacities_never_zero() {
        let config = StoreConfig {
            max_data_change_executor_queue_size: 0,
            max_data_change_listener_queue_size: 0,
            ..Default::default()
        };
        assert_eq!(config.executor_queue_capacity(), 1);
        assert_eq!(config.listener_queue_capacity(), 1);
    }
}
