//! # confplane-schema
//!
//! Schema layer for confplane.
//!
//! This crate provides:
//! - Model source parsing and validation
//! - Compilation of model sources into an immutable schema context
//! - Path addressing into schema-modeled trees
//! - A binding codec translating between generic JSON values and typed data

pub mod codec;
pub mod context;
pub mod error;
pub mod path;
pub mod source;

pub use codec::BindingCodec;
pub use context::{ResolvedNode, SchemaContext, SchemaModule, SchemaNode};
pub use error::SchemaError;
pub use path::DataPath;
pub use source::{LeafType, ModelSource};
