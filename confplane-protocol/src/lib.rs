//! # confplane-protocol
//!
//! Wire protocol for the confplane management plane.
//!
//! This crate provides:
//! - Binary framing with length prefix and CRC32C validation
//! - JSON message serialization/deserialization
//! - Request/Response envelope types
//! - Error codes and protocol constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Frame, FrameFlags, FRAME_HEADER_SIZE, MAGIC};
pub use message::{
    AuthParams, EditOperation, EditParams, GetParams, HelloParams, HelloResult, Operation, Request,
    Response, ResponseError, ResponseMeta, ResponseStatus, RpcParams,
};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default port for the confplane server.
pub const DEFAULT_PORT: u16 = 2022;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
