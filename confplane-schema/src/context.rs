//! Schema context compilation.
//!
//! A [`SchemaContext`] is built once at startup from a fixed set of model
//! sources and never mutated afterwards. Everything downstream (stores,
//! broker, codec, server) shares it read-only behind an `Arc`.

use crate::error::SchemaError;
use crate::path::DataPath;
use crate::source::{LeafType, ModelSource, RawSchemaNode};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A compiled schema node.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Container {
        children: BTreeMap<String, SchemaNode>,
    },
    List {
        key: String,
        children: BTreeMap<String, SchemaNode>,
    },
    Leaf {
        leaf_type: LeafType,
    },
}

impl SchemaNode {
    fn compile(raw: &RawSchemaNode) -> SchemaNode {
        match raw {
            RawSchemaNode::Container { children } => SchemaNode::Container {
                children: children
                    .iter()
                    .map(|(name, child)| (name.clone(), SchemaNode::compile(child)))
                    .collect(),
            },
            RawSchemaNode::List { key, children } => SchemaNode::List {
                key: key.clone(),
                children: children
                    .iter()
                    .map(|(name, child)| (name.clone(), SchemaNode::compile(child)))
                    .collect(),
            },
            RawSchemaNode::Leaf { leaf_type } => SchemaNode::Leaf {
                leaf_type: *leaf_type,
            },
        }
    }

    /// Returns the child with the given name, if this node has children.
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        match self {
            SchemaNode::Container { children } | SchemaNode::List { children, .. } => {
                children.get(name)
            }
            SchemaNode::Leaf { .. } => None,
        }
    }

    /// Returns true for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        matches!(self, SchemaNode::Leaf { .. })
    }

    /// Returns the kind name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaNode::Container { .. } => "container",
            SchemaNode::List { .. } => "list",
            SchemaNode::Leaf { .. } => "leaf",
        }
    }
}

/// A compiled module within a schema context.
#[derive(Debug, Clone)]
pub struct SchemaModule {
    /// Module name.
    pub name: String,

    /// Module revision date.
    pub revision: String,

    /// Module namespace URI.
    pub namespace: String,

    /// Checksum of the source for integrity checks.
    pub checksum: String,

    /// Top-level nodes declared by this module.
    pub roots: BTreeMap<String, SchemaNode>,
}

/// Result of resolving a data path against the schema.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedNode<'a> {
    /// The path addresses a schema node (container, list, or leaf).
    Node(&'a SchemaNode),
    /// The path addresses one entry of a list, by key value.
    ListEntry { list: &'a SchemaNode },
}

/// Immutable, process-lifetime schema context.
#[derive(Debug)]
pub struct SchemaContext {
    modules: BTreeMap<String, Arc<SchemaModule>>,
    /// Top-level node name -> (declaring module, node).
    roots: BTreeMap<String, (String, SchemaNode)>,
}

impl SchemaContext {
    /// Compiles a set of model sources into a schema context.
    ///
    /// Fails if the sources are inconsistent: two revisions of the same
    /// module, the same module twice, two modules declaring the same
    /// top-level node, or an import naming a module not in the set.
    pub fn build(sources: &[ModelSource]) -> Result<Arc<SchemaContext>, SchemaError> {
        let mut modules: BTreeMap<String, Arc<SchemaModule>> = BTreeMap::new();
        let mut roots: BTreeMap<String, (String, SchemaNode)> = BTreeMap::new();

        for source in sources {
            if let Some(existing) = modules.get(&source.name) {
                if existing.revision == source.revision {
                    return Err(SchemaError::DuplicateModule {
                        module: source.name.clone(),
                        revision: source.revision.clone(),
                    });
                }
                return Err(SchemaError::ConflictingRevision {
                    module: source.name.clone(),
                    first: existing.revision.clone(),
                    second: source.revision.clone(),
                });
            }

            let source_bytes = serde_json::to_vec(source)?;
            let checksum = format!("{:08x}", crc32c::crc32c(&source_bytes));

            let compiled_roots: BTreeMap<String, SchemaNode> = source
                .nodes
                .iter()
                .map(|(name, node)| (name.clone(), SchemaNode::compile(node)))
                .collect();

            for (name, node) in &compiled_roots {
                if let Some((first, _)) = roots.get(name) {
                    return Err(SchemaError::ConflictingDefinition {
                        path: format!("/{}", name),
                        first: first.clone(),
                        second: source.name.clone(),
                    });
                }
                roots.insert(name.clone(), (source.name.clone(), node.clone()));
            }

            modules.insert(
                source.name.clone(),
                Arc::new(SchemaModule {
                    name: source.name.clone(),
                    revision: source.revision.clone(),
                    namespace: source.namespace.clone(),
                    checksum,
                    roots: compiled_roots,
                }),
            );
        }

        // Imports may only name modules present in the same set.
        for source in sources {
            for import in &source.imports {
                if !modules.contains_key(import) {
                    return Err(SchemaError::UnresolvedImport {
                        module: source.name.clone(),
                        import: import.clone(),
                    });
                }
            }
        }

        tracing::debug!(
            "Compiled schema context: {} modules, {} top-level nodes",
            modules.len(),
            roots.len()
        );

        Ok(Arc::new(SchemaContext { modules, roots }))
    }

    /// Looks up a module by name.
    pub fn module(&self, name: &str) -> Option<&Arc<SchemaModule>> {
        self.modules.get(name)
    }

    /// Iterates over all modules.
    pub fn modules(&self) -> impl Iterator<Item = &Arc<SchemaModule>> {
        self.modules.values()
    }

    /// Returns the number of compiled modules.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Resolves a data path against the schema, distinguishing a list node
    /// from a list entry addressed by its key value.
    ///
    /// List nodes consume one extra path segment (the entry key value)
    /// before descending into their children, so `/interfaces/interface/
    /// eth0/enabled` resolves `enabled` under the `interface` list.
    pub fn resolve(&self, path: &DataPath) -> Option<ResolvedNode<'_>> {
        let mut segments = path.segments().iter();
        let first = segments.next()?;
        let mut resolved = ResolvedNode::Node(&self.roots.get(first.as_str())?.1);

        for segment in segments {
            resolved = match resolved {
                // A segment under a list node is an entry key value.
                ResolvedNode::Node(node @ SchemaNode::List { .. }) => {
                    ResolvedNode::ListEntry { list: node }
                }
                ResolvedNode::Node(node) => ResolvedNode::Node(node.child(segment)?),
                ResolvedNode::ListEntry { list } => ResolvedNode::Node(list.child(segment)?),
            };
        }
        Some(resolved)
    }

    /// Resolves the schema node addressed by a data path. A path ending at
    /// a list entry resolves to the list node itself.
    pub fn find_node(&self, path: &DataPath) -> Option<&SchemaNode> {
        match self.resolve(path)? {
            ResolvedNode::Node(node) => Some(node),
            ResolvedNode::ListEntry { list } => Some(list),
        }
    }

    /// Returns true if the path addresses a known schema node.
    pub fn contains(&self, path: &DataPath) -> bool {
        path.is_root() || self.find_node(path).is_some()
    }
}
