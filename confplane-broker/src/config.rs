//! Data-broker configuration.

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the broker's commit executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Maximum number of queued write submissions. Submissions beyond
    /// this bound are rejected immediately, never blocked or dropped.
    pub max_queue_size: usize,

    /// Threads kept in the commit pool even when idle.
    pub core_pool_size: usize,

    /// Maximum threads in the commit pool. Commit application is a single
    /// ordered worker; the pool bounds cover the surrounding executor.
    pub max_pool_size: usize,

    /// Idle keep-alive for threads beyond the core size, in seconds.
    pub keepalive_time_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            core_pool_size: 10,
            max_pool_size: 20,
            keepalive_time_secs: 60,
        }
    }
}

impl BrokerConfig {
    /// Validates the configured ranges, failing fast on nonsense values.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.max_queue_size == 0 {
            return Err(BrokerError::InvalidConfig {
                reason: "max_queue_size must be > 0".to_string(),
            });
        }
        if self.max_pool_size == 0 {
            return Err(BrokerError::InvalidConfig {
                reason: "max_pool_size must be > 0".to_string(),
            });
        }
        if self.core_pool_size > self.max_pool_size {
            return Err(BrokerError::InvalidConfig {
                reason: format!(
                    "core_pool_size ({}) must not exceed max_pool_size ({})",
                    self.core_pool_size, self.max_pool_size
                ),
            });
        }
        Ok(())
    }

    /// Returns the keep-alive as a duration.
    pub fn keepalive_time(&self) -> Duration {
        Duration::from_secs(self.keepalive_time_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = BrokerConfig::default();
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.max_pool_size, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_queue_rejected() {
        let config = BrokerConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_core_above_max_rejected() {
        let config = BrokerConfig {
            core_pool_size: 30,
            max_pool_size: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
