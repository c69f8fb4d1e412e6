//! # confplane-store
//!
//! In-memory data stores for confplane.
//!
//! This crate provides:
//! - A copy-on-write data tree with cheap snapshots
//! - The CONFIGURATION and OPERATIONAL logical stores
//! - Versioned prepare/commit with conflict detection
//! - Bounded, asynchronous change-notification fan-out

pub mod config;
pub mod error;
pub mod notify;
pub mod store;
pub mod tree;

pub use config::StoreConfig;
pub use error::StoreError;
pub use notify::{ChangeNotifier, DataTreeChange, ListenerHandle};
pub use store::{DataStore, LogicalStore, PreparedWrite, StoreSnapshot};
pub use tree::DataTree;
