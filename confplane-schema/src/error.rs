//! Schema error types.

use thiserror::Error;

/// Errors from schema compilation and binding.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("model compilation failed: {reason}")]
    ModelCompilation { reason: String },

    #[error("duplicate module: {module} (revision {revision})")]
    DuplicateModule { module: String, revision: String },

    #[error("conflicting revisions of module '{module}': {first} vs {second}")]
    ConflictingRevision {
        module: String,
        first: String,
        second: String,
    },

    #[error("conflicting definition of '{path}' in modules '{first}' and '{second}'")]
    ConflictingDefinition {
        path: String,
        first: String,
        second: String,
    },

    #[error("unresolved import '{import}' in module '{module}'")]
    UnresolvedImport { module: String, import: String },

    #[error("unknown node: {path}")]
    UnknownNode { path: String },

    #[error("unknown child '{child}' under '{parent}'")]
    UnknownChild { parent: String, child: String },

    #[error("type mismatch at '{path}': expected {expected}")]
    TypeMismatch { path: String, expected: String },

    #[error("invalid path: {reason}")]
    InvalidPath { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    /// Returns whether this error is fatal at startup (a compilation failure).
    pub fn is_compilation_failure(&self) -> bool {
        matches!(
            self,
            SchemaError::ModelCompilation { .. }
                | SchemaError::DuplicateModule { .. }
                | SchemaError::ConflictingRevision { .. }
                | SchemaError::ConflictingDefinition { .. }
                | SchemaError::UnresolvedImport { .. }
        )
    }
}
