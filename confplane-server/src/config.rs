//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via CONFPLANE_CONFIG)
//! 3. Environment variables

use confplane_broker::BrokerConfig;
use confplane_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Aggregate server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and credential settings.
    pub server: ServerSettings,
    /// Schema model sources.
    pub schema: SchemaSettings,
    /// Data-store executor settings.
    pub store: StoreConfig,
    /// Data-broker executor settings.
    pub broker: BrokerConfig,
    /// Monitoring publisher settings.
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("CONFPLANE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.server.apply_env_overrides();
        self.schema.apply_env_overrides();
        self.monitoring.apply_env_overrides();

        if let Ok(size) = std::env::var("CONFPLANE_BROKER_QUEUE_SIZE") {
            if let Ok(n) = size.parse() {
                self.broker.max_queue_size = n;
            }
        }
    }

    /// Validates every section, failing fast on out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.monitoring.validate()?;
        self.store
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.broker
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(())
    }
}

/// Listener and credential settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to (0 picks an ephemeral port).
    pub port: u16,
    /// Username clients must present.
    pub username: String,
    /// Password clients must present.
    pub password: String,
    /// Time allowed for a connection to reach Established, in milliseconds.
    pub connection_timeout_ms: u64,
    /// Idle timeout for established sessions, in seconds.
    pub idle_timeout_secs: u64,
    /// Worker threads for the I/O runtime the server runs on.
    pub max_io_threads: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2022,
            username: "confplane".to_string(),
            password: "confplane".to_string(),
            connection_timeout_ms: 5000,
            idle_timeout_secs: 300,
            max_io_threads: 10,
        }
    }
}

impl ServerSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CONFPLANE_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("CONFPLANE_PORT") {
            if let Ok(n) = port.parse() {
                self.port = n;
            }
        }
        if let Ok(user) = std::env::var("CONFPLANE_USERNAME") {
            self.username = user;
        }
        if let Ok(pass) = std::env::var("CONFPLANE_PASSWORD") {
            self.password = pass;
        }
        if let Ok(timeout) = std::env::var("CONFPLANE_CONNECTION_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.connection_timeout_ms = ms;
            }
        }
        if let Ok(threads) = std::env::var("CONFPLANE_MAX_IO_THREADS") {
            if let Ok(n) = threads.parse() {
                self.max_io_threads = n;
            }
        }
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation("host must not be empty".to_string()));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(ConfigError::Validation(
                "username and password must not be empty".to_string(),
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "connection_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.max_io_threads == 0 {
            return Err(ConfigError::Validation(
                "max_io_threads must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the bind address as "host:port".
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the negotiation deadline as a duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Returns the established-session idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Schema model sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// Paths to JSON model source files, compiled at startup.
    pub model_paths: Vec<PathBuf>,
}

impl SchemaSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(paths) = std::env::var("CONFPLANE_MODELS") {
            self.model_paths = paths
                .split(',')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }
    }
}

/// Monitoring publisher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Seconds between state snapshots; 0 disables the publisher.
    pub update_interval_secs: u64,
    /// Threads kept in the publisher pool even when idle.
    pub core_pool_size: usize,
    /// Maximum threads in the publisher pool.
    pub max_thread_count: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 10,
            core_pool_size: 10,
            max_thread_count: 20,
        }
    }
}

impl MonitoringConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var("CONFPLANE_MONITOR_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.update_interval_secs = secs;
            }
        }
    }

    /// Validates the settings. A zero interval is valid and means disabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_thread_count == 0 {
            return Err(ConfigError::Validation(
                "monitoring max_thread_count must be > 0".to_string(),
            ));
        }
        if self.core_pool_size > self.max_thread_count {
            return Err(ConfigError::Validation(format!(
                "monitoring core_pool_size ({}) must not exceed max_thread_count ({})",
                self.core_pool_size, self.max_thread_count
            )));
        }
        Ok(())
    }

    /// Returns whether the publisher should run at all.
    pub fn is_disabled(&self) -> bool {
        self.update_interval_secs == 0
    }

    /// Returns the update interval as a duration.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file '{0}': {1}")]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 2022);
        assert_eq!(config.server.username, "confplane");
        assert_eq!(config.server.connection_timeout_ms, 5000);
        assert_eq!(config.server.max_io_threads, 10);
        assert_eq!(config.monitoring.update_interval_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let mut config = Config::default();
        config.server.password = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_connection_timeout_rejected() {
        let mut config = Config::default();
        config.server.connection_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_monitoring_interval_is_valid() {
        let mut config = Config::default();
        config.monitoring.update_interval_secs = 0;
        assert!(config.monitoring.is_disabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.broker.max_queue_size, config.broker.max_queue_size);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confplane.yaml");
        std::fs::write(
            &path,
            "server:\n  port: 9830\nmonitoring:\n  update_interval_secs: 0\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9830);
        assert!(config.monitoring.is_disabled());
        // Untouched sections keep their defaults.
        assert_eq!(config.server.username, "confplane");
    }
}
