//! Protocol error types and error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic bytes: expected 'CFPX', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("invalid frame flags: {0:#x}")]
    InvalidFlags(u16),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Stable error codes returned in error responses.
///
/// These codes are part of the protocol contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Protocol errors
    BadRequest,
    CapabilityMismatch,

    // Authentication errors
    AuthFailed,

    // Schema errors
    ModelCompilation,
    ValidationFailed,

    // Data errors
    NotFound,
    Conflict,

    // System errors
    CapacityExceeded,
    InternalError,
}

impl ErrorCode {
    /// Returns whether this error is potentially retryable.
    ///
    /// A conflict is not: the caller must re-derive its transaction from
    /// fresh state before trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::CapacityExceeded | ErrorCode::InternalError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::BadRequest => write!(f, "BAD_REQUEST"),
            ErrorCode::CapabilityMismatch => write!(f, "CAPABILITY_MISMATCH"),
            ErrorCode::AuthFailed => write!(f, "AUTH_FAILED"),
            ErrorCode::ModelCompilation => write!(f, "MODEL_COMPILATION"),
            ErrorCode::ValidationFailed => write!(f, "VALIDATION_FAILED"),
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::Conflict => write!(f, "CONFLICT"),
            ErrorCode::CapacityExceeded => write!(f, "CAPACITY_EXCEEDED"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}
