//! # confplane-server
//!
//! Protocol server for confplane.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Session negotiation and lifecycle
//! - Request dispatch against the data broker
//! - Static credential authentication
//! - Periodic monitoring publication
//! - Ordered component shutdown

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod monitor;
pub mod server;
pub mod session;

pub use auth::Authenticator;
pub use config::{Config, ConfigError, MonitoringConfig, SchemaSettings, ServerSettings};
pub use error::ServerError;
pub use handler::{RequestHandler, ServerInfo, BASE_CAPABILITIES};
pub use lifecycle::{LifecycleManager, ManagedResource};
pub use monitor::{monitoring_model_source, MonitoringPublisher, SessionSource};
pub use server::{ProtocolServer, ServerStats, SessionInfo};
pub use session::{negotiate_capabilities, Session, SessionIdAllocator, SessionState};
