//! Model source types.
//!
//! Model sources use a JSON DSL:
//!
//! ```json
//! {
//!   "name": "example-interfaces",
//!   "revision": "2024-01-15",
//!   "namespace": "urn:example:interfaces",
//!   "imports": ["example-types"],
//!   "nodes": {
//!     "interfaces": {
//!       "kind": "container",
//!       "children": {
//!         "interface": {
//!           "kind": "list",
//!           "key": "name",
//!           "children": {
//!             "name": {"kind": "leaf", "type": "string"},
//!             "enabled": {"kind": "leaf", "type": "boolean"}
//!           }
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value type carried by a leaf node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeafType {
    String,
    Boolean,
    Int64,
    Uint64,
    Decimal,
    /// Arbitrary JSON, exempt from type checking.
    AnyJson,
}

impl LeafType {
    /// Returns the human-readable type name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            LeafType::String => "string",
            LeafType::Boolean => "boolean",
            LeafType::Int64 => "int64",
            LeafType::Uint64 => "uint64",
            LeafType::Decimal => "decimal",
            LeafType::AnyJson => "any-json",
        }
    }

    /// Checks a JSON value against this leaf type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            LeafType::String => value.is_string(),
            LeafType::Boolean => value.is_boolean(),
            LeafType::Int64 => value.is_i64(),
            LeafType::Uint64 => value.is_u64(),
            LeafType::Decimal => value.is_number(),
            LeafType::AnyJson => true,
        }
    }
}

/// A schema node as declared in a model source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RawSchemaNode {
    Container {
        #[serde(default)]
        children: BTreeMap<String, RawSchemaNode>,
    },
    List {
        key: String,
        #[serde(default)]
        children: BTreeMap<String, RawSchemaNode>,
    },
    Leaf {
        #[serde(rename = "type")]
        leaf_type: LeafType,
    },
}

/// A declarative data-model source, prior to compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSource {
    /// Module name, unique within a schema context.
    pub name: String,

    /// Module revision date.
    pub revision: String,

    /// Module namespace URI.
    pub namespace: String,

    /// Names of modules this module depends on.
    #[serde(default)]
    pub imports: Vec<String>,

    /// Top-level schema nodes declared by this module.
    #[serde(default)]
    pub nodes: BTreeMap<String, RawSchemaNode>,
}

impl ModelSource {
    /// Parses a model source from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, SchemaError> {
        let source: ModelSource = serde_json::from_value(json.clone())?;
        source.check_well_formed()?;
        Ok(source)
    }

    /// Parses a model source from JSON text.
    pub fn from_str(text: &str) -> Result<Self, SchemaError> {
        let source: ModelSource = serde_json::from_str(text)?;
        source.check_well_formed()?;
        Ok(source)
    }

    fn check_well_formed(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::ModelCompilation {
                reason: "module name must not be blank".to_string(),
            });
        }
        if self.revision.trim().is_empty() {
            return Err(SchemaError::ModelCompilation {
                reason: format!("module '{}' has a blank revision", self.name),
            });
        }
        for (name, node) in &self.nodes {
            Self::check_node(&self.name, name, node)?;
        }
        Ok(())
    }

    fn check_node(module: &str, name: &str, node: &RawSchemaNode) -> Result<(), SchemaError> {
        match node {
            RawSchemaNode::List { key, children } => {
                match children.get(key) {
                    Some(RawSchemaNode::Leaf { .. }) => {}
                    _ => {
                        return Err(SchemaError::ModelCompilation {
                            reason: format!(
                                "list '{}' in module '{}' declares key '{}' which is not a leaf child",
                                name, module, key
                            ),
                        })
                    }
                }
                for (child_name, child) in children {
                    Self::check_node(module, child_name, child)?;
                }
                Ok(())
            }
            RawSchemaNode::Container { children } => {
                for (child_name, child) in children {
                    Self::check_node(module, child_name, child)?;
                }
                Ok(())
            }
            RawSchemaNode::Leaf { .. } => Ok(()),
        }
    }

    /// Returns the source as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_source() -> serde_json::Value {
        json!({
            "name": "example-interfaces",
            "revision": "2024-01-15",
            "namespace": "urn:example:interfaces",
            "nodes": {
                "interfaces": {
                    "kind": "container",
                    "children": {
                        "interface": {
                            "kind": "list",
                            "key": "name",
                            "children": {
                                "name": {"kind": "leaf", "type": "string"},
                                "enabled": {"kind": "leaf", "type": "boolean"},
                                "mtu": {"kind": "leaf", "type": "uint64"}
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_source() {
        let source = ModelSource::from_json(&sample_source()).unwrap();
        assert_eq!(source.name, "example-interfaces");
        assert_eq!(source.nodes.len(), 1);
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut json = sample_source();
        json["name"] = json!("  ");
        assert!(matches!(
            ModelSource::from_json(&json),
            Err(SchemaError::ModelCompilation { .. })
        ));
    }

    #[test]
    fn test_list_key_must_be_leaf() {
        let json = json!({
            "name": "bad",
            "revision": "2024-01-01",
            "namespace": "urn:bad",
            "nodes": {
                "items": {
                    "kind": "list",
                    "key": "missing",
                    "children": {
                        "value": {"kind": "leaf", "type": "string"}
                    }
                }
            }
        });
        assert!(matches!(
            ModelSource::from_json(&json),
            Err(SchemaError::ModelCompilation { .. })
        ));
    }

    #[test]
    fn test_leaf_type_checks() {
        assert!(LeafType::String.accepts(&json!("x")));
        assert!(!LeafType::String.accepts(&json!(1)));
        assert!(LeafType::Boolean.accepts(&json!(true)));
        assert!(LeafType::Uint64.accepts(&json!(42)));
        assert!(!LeafType::Uint64.accepts(&json!(-1)));
        assert!(LeafType::Decimal.accepts(&json!(1.5)));
        assert!(LeafType::AnyJson.accepts(&json!({"free": "form"})));
    }
}
