//! # confplane-broker
//!
//! Transactional front for the confplane data stores.
//!
//! This crate provides:
//! - Read, write, and read-write transactions over both logical stores
//! - A single bounded, ordered commit queue (FIFO, one commit in flight)
//! - Admission control: a full queue rejects submissions immediately
//! - The RPC router (register-once, handle-based unregistration)
//! - Aggregation of operation service capabilities

pub mod broker;
pub mod config;
pub mod error;
pub mod ops;
pub mod rpc;
pub mod transaction;

pub use broker::{CommitFuture, CommitOutcome, DataBroker};
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use ops::{
    Capability, OperationServiceAggregator, OperationServiceFactory, OpsError,
    StaticOperationServiceFactory,
};
pub use rpc::{handler_fn, OperationId, RpcError, RpcHandler, RpcRegistration, RpcRouter};
pub use transaction::{ReadTransaction, ReadWriteTransaction, WriteTransaction};
