//! Binding codec.
//!
//! Translates between generic JSON values and whatever typed representation
//! a caller prefers, validating against the schema context in both
//! directions. The codec is stateless; it only borrows the compiled
//! context.

use crate::context::{ResolvedNode, SchemaContext, SchemaNode};
use crate::error::SchemaError;
use crate::path::DataPath;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Stateless translator between schema-described generic values and typed
/// representations.
#[derive(Debug, Clone)]
pub struct BindingCodec {
    context: Arc<SchemaContext>,
}

impl BindingCodec {
    /// Creates a codec over the given schema context.
    pub fn new(context: Arc<SchemaContext>) -> Self {
        Self { context }
    }

    /// Returns the backing schema context.
    pub fn context(&self) -> &Arc<SchemaContext> {
        &self.context
    }

    /// Validates a generic value destined for `path`.
    ///
    /// Containers must be objects whose keys are declared children; list
    /// nodes must be objects keyed by entry key value; leaves must match
    /// their declared type.
    pub fn validate(&self, path: &DataPath, value: &Value) -> Result<(), SchemaError> {
        if path.is_root() {
            return self.validate_root(value);
        }
        let resolved = self
            .context
            .resolve(path)
            .ok_or_else(|| SchemaError::UnknownNode {
                path: path.to_string(),
            })?;
        match resolved {
            ResolvedNode::Node(node) => self.validate_node(path, node, value),
            ResolvedNode::ListEntry { list } => {
                let (key, children) = match list {
                    SchemaNode::List { key, children } => (key, children),
                    _ => unreachable!("list entry resolves to a list node"),
                };
                let entry_key = path.last().unwrap_or_default();
                self.validate_entry(path, key, children, entry_key, value)
            }
        }
    }

    fn validate_root(&self, value: &Value) -> Result<(), SchemaError> {
        let object = value.as_object().ok_or_else(|| SchemaError::TypeMismatch {
            path: "/".to_string(),
            expected: "object".to_string(),
        })?;
        for (name, child_value) in object {
            let child_path = DataPath::root().child(name.clone());
            self.validate(&child_path, child_value)?;
        }
        Ok(())
    }

    fn validate_node(
        &self,
        path: &DataPath,
        node: &SchemaNode,
        value: &Value,
    ) -> Result<(), SchemaError> {
        match node {
            SchemaNode::Leaf { leaf_type } => {
                if !leaf_type.accepts(value) {
                    return Err(SchemaError::TypeMismatch {
                        path: path.to_string(),
                        expected: leaf_type.name().to_string(),
                    });
                }
                Ok(())
            }
            SchemaNode::Container { children } => {
                let object = value.as_object().ok_or_else(|| SchemaError::TypeMismatch {
                    path: path.to_string(),
                    expected: "object".to_string(),
                })?;
                for (name, child_value) in object {
                    let child = children.get(name).ok_or_else(|| SchemaError::UnknownChild {
                        parent: path.to_string(),
                        child: name.clone(),
                    })?;
                    self.validate_node(&path.child(name.clone()), child, child_value)?;
                }
                Ok(())
            }
            SchemaNode::List { key, children } => {
                let object = value.as_object().ok_or_else(|| SchemaError::TypeMismatch {
                    path: path.to_string(),
                    expected: "object keyed by entry key".to_string(),
                })?;
                for (entry_key, entry_value) in object {
                    let entry_path = path.child(entry_key.clone());
                    self.validate_entry(&entry_path, key, children, entry_key, entry_value)?;
                }
                Ok(())
            }
        }
    }

    /// Validates a single list entry value at `entry_path`.
    fn validate_entry(
        &self,
        entry_path: &DataPath,
        key: &str,
        children: &std::collections::BTreeMap<String, SchemaNode>,
        entry_key: &str,
        value: &Value,
    ) -> Result<(), SchemaError> {
        let entry = value.as_object().ok_or_else(|| SchemaError::TypeMismatch {
            path: entry_path.to_string(),
            expected: "object".to_string(),
        })?;
        for (name, child_value) in entry {
            let child = children.get(name).ok_or_else(|| SchemaError::UnknownChild {
                parent: entry_path.to_string(),
                child: name.clone(),
            })?;
            self.validate_node(&entry_path.child(name.clone()), child, child_value)?;
        }
        // The key leaf, when present inside the entry, must agree with the
        // entry's addressing key.
        if let Some(key_value) = entry.get(key) {
            if key_value.as_str() != Some(entry_key) {
                return Err(SchemaError::TypeMismatch {
                    path: entry_path.child(key.to_string()).to_string(),
                    expected: format!("key leaf matching entry key '{}'", entry_key),
                });
            }
        }
        Ok(())
    }

    /// Encodes a typed value into a validated generic value for `path`.
    pub fn encode<T: Serialize>(&self, path: &DataPath, value: &T) -> Result<Value, SchemaError> {
        let generic = serde_json::to_value(value)?;
        self.validate(path, &generic)?;
        Ok(generic)
    }

    /// Decodes a generic value read from `path` into a typed value.
    pub fn decode<T: DeserializeOwned>(
        &self,
        path: &DataPath,
        value: &Value,
    ) -> Result<T, SchemaError> {
        self.validate(path, value)?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ModelSource;
    use serde::Deserialize;
    use serde_json::json;

    fn codec() -> BindingCodec {
        let source = ModelSource::from_json(&json!({
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
        }))
        .unwrap();
        BindingCodec::new(SchemaContext::build(&[source]).unwrap())
    }

    #[test]
    fn test_validate_leaf() {
        let codec = codec();
        let path = DataPath::parse("/interfaces/interface/eth0/enabled").unwrap();
        assert!(codec.validate(&path, &json!(true)).is_ok());
        assert!(matches!(
            codec.validate(&path, &json!("yes")),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_container_tree() {
        let codec = codec();
        let path = DataPath::parse("/interfaces").unwrap();
        let value = json!({
            "interface": {
                "eth0": {"name": "eth0", "enabled": true, "mtu": 1500},
                "eth1": {"enabled": false}
            }
        });
        assert!(codec.validate(&path, &value).is_ok());
    }

    #[test]
    fn test_unknown_child_rejected() {
        let codec = codec();
        let path = DataPath::parse("/interfaces").unwrap();
        let value = json!({"bogus": {}});
        assert!(matches!(
            codec.validate(&path, &value),
            Err(SchemaError::UnknownChild { .. })
        ));
    }

    #[test]
    fn test_key_leaf_must_match_entry_key() {
        let codec = codec();
        let path = DataPath::parse("/interfaces/interface").unwrap();
        let value = json!({"eth0": {"name": "eth9"}});
        assert!(matches!(
            codec.validate(&path, &value),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_path_rejected() {
        let codec = codec();
        let path = DataPath::parse("/nope").unwrap();
        assert!(matches!(
            codec.validate(&path, &json!({})),
            Err(SchemaError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_typed_roundtrip() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Interface {
            name: String,
            enabled: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            mtu: Option<u64>,
        }

        let codec = codec();
        let path = DataPath::parse("/interfaces/interface/eth0").unwrap();
        let typed = Interface {
            name: "eth0".to_string(),
            enabled: true,
            mtu: Some(9000),
        };

        let generic = codec.encode(&path, &typed).unwrap();
        let back: Interface = codec.decode(&path, &generic).unwrap();
        assert_eq!(back, typed);
    }
}
