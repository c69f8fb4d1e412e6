//! Store error types.

use thiserror::Error;

/// Errors from the data stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(#[from] confplane_schema::SchemaError),

    #[error("commit conflict on {store}: transaction based on version {base}, store is at {actual}")]
    Conflict {
        store: &'static str,
        base: u64,
        actual: u64,
    },

    #[error("invalid store configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl StoreError {
    /// Returns whether the caller should retry with a fresh transaction.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
