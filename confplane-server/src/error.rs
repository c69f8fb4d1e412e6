//! Server error types.

use confplane_broker::{BrokerError, RpcError};
use confplane_protocol::ErrorCode;
use confplane_schema::SchemaError;
use confplane_store::StoreError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] confplane_protocol::ProtocolError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("capability mismatch: {0}")]
    CapabilityMismatch(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation not allowed in state {state}: {operation}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    #[error("no data at path: {0}")]
    NotFound(String),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Converts to protocol error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServerError::Io(_) => ErrorCode::InternalError,
            ServerError::Protocol(_) => ErrorCode::BadRequest,
            ServerError::Schema(e) => {
                if e.is_compilation_failure() {
                    ErrorCode::ModelCompilation
                } else {
                    ErrorCode::ValidationFailed
                }
            }
            ServerError::Broker(e) => match e {
                BrokerError::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
                BrokerError::Store(StoreError::Conflict { .. }) => ErrorCode::Conflict,
                BrokerError::Store(StoreError::Validation(_)) => ErrorCode::ValidationFailed,
                _ => ErrorCode::InternalError,
            },
            ServerError::Rpc(e) => match e {
                RpcError::NotFound { .. } => ErrorCode::NotFound,
                _ => ErrorCode::InternalError,
            },
            ServerError::Json(_) => ErrorCode::BadRequest,
            ServerError::AuthFailed(_) => ErrorCode::AuthFailed,
            ServerError::CapabilityMismatch(_) => ErrorCode::CapabilityMismatch,
            ServerError::InvalidRequest(_) => ErrorCode::BadRequest,
            ServerError::InvalidState { .. } => ErrorCode::BadRequest,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::ShuttingDown => ErrorCode::InternalError,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.error_code().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = ServerError::Broker(BrokerError::CapacityExceeded { capacity: 10 });
        assert_eq!(err.error_code(), ErrorCode::CapacityExceeded);
        assert!(err.is_retryable());

        let err = ServerError::Broker(BrokerError::Store(StoreError::Conflict {
            store: "CONFIG-DS",
            base: 1,
            actual: 2,
        }));
        assert_eq!(err.error_code(), ErrorCode::Conflict);
        assert!(!err.is_retryable());

        let err = ServerError::AuthFailed("bad credentials".to_string());
        assert_eq!(err.error_code(), ErrorCode::AuthFailed);

        let err = ServerError::NotFound("/system".to_string());
        assert_eq!(err.error_code(), ErrorCode::NotFound);
    }
}
