//! Copy-on-write data tree.
//!
//! A [`DataTree`] is a hierarchical, keyed structure mapping path segments
//! to values or sub-trees. Interior nodes are shared behind `Arc`, so
//! cloning a tree is O(1) and mutation clones only the path being written.
//! This is what makes snapshot reads free and transaction candidates
//! cheap.

use confplane_schema::DataPath;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct TreeNode {
    /// Scalar payload; `None` for interior nodes.
    value: Option<Value>,
    children: BTreeMap<String, Arc<TreeNode>>,
}

impl TreeNode {
    fn from_value(value: &Value) -> TreeNode {
        match value {
            Value::Object(map) => TreeNode {
                value: None,
                children: map
                    .iter()
                    .map(|(name, child)| (name.clone(), Arc::new(TreeNode::from_value(child))))
                    .collect(),
            },
            other => TreeNode {
                value: Some(other.clone()),
                children: BTreeMap::new(),
            },
        }
    }

    fn to_value(&self) -> Value {
        if let Some(value) = &self.value {
            return value.clone();
        }
        Value::Object(
            self.children
                .iter()
                .map(|(name, child)| (name.clone(), child.to_value()))
                .collect(),
        )
    }

    fn merge(&mut self, value: &Value) {
        match value {
            Value::Object(map) => {
                self.value = None;
                for (name, child_value) in map {
                    let child = self.children.entry(name.clone()).or_default();
                    Arc::make_mut(child).merge(child_value);
                }
            }
            other => {
                self.children.clear();
                self.value = Some(other.clone());
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

/// A versionless, immutable-by-sharing data tree.
#[derive(Debug, Clone, Default)]
pub struct DataTree {
    root: Arc<TreeNode>,
}

impl DataTree {
    /// Returns an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from a JSON object.
    pub fn from_value(value: &Value) -> Self {
        Self {
            root: Arc::new(TreeNode::from_value(value)),
        }
    }

    /// Returns true if the tree holds no data.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    fn find(&self, path: &DataPath) -> Option<&TreeNode> {
        let mut node = self.root.as_ref();
        for segment in path.segments() {
            node = node.children.get(segment)?.as_ref();
        }
        Some(node)
    }

    /// Returns true if the path addresses existing data.
    pub fn contains(&self, path: &DataPath) -> bool {
        self.find(path).is_some()
    }

    /// Materializes the subtree at `path` as a JSON value, or `None` if
    /// the path does not exist.
    pub fn get(&self, path: &DataPath) -> Option<Value> {
        self.find(path).map(TreeNode::to_value)
    }

    /// Materializes the whole tree as a JSON value.
    pub fn to_value(&self) -> Value {
        self.root.to_value()
    }

    /// Descends to `path`, creating missing interior nodes, and returns a
    /// mutable reference. Nodes along the path are copied on write.
    fn make_path(&mut self, path: &DataPath) -> &mut TreeNode {
        let mut node = Arc::make_mut(&mut self.root);
        for segment in path.segments() {
            let child = node.children.entry(segment.clone()).or_default();
            node = Arc::make_mut(child);
        }
        node
    }

    /// Replaces the subtree at `path` with `value`.
    pub fn put(&mut self, path: &DataPath, value: &Value) {
        *self.make_path(path) = TreeNode::from_value(value);
    }

    /// Deep-merges `value` into the subtree at `path`: objects are merged
    /// key by key, scalars overwrite.
    pub fn merge(&mut self, path: &DataPath, value: &Value) {
        self.make_path(path).merge(value);
    }

    /// Removes the subtree at `path`. Returns false if nothing existed.
    pub fn delete(&mut self, path: &DataPath) -> bool {
        if path.is_root() {
            let existed = !self.is_empty();
            self.root = Arc::new(TreeNode::default());
            return existed;
        }
        if !self.contains(path) {
            return false;
        }
        let parent = path.parent().expect("non-root path has a parent");
        let last = path.last().expect("non-root path has a last segment");
        let parent_node = self.make_path(&parent);
        parent_node.children.remove(last).is_some()
    }
}
