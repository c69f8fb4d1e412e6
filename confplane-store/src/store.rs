//! Logical data stores.
//!
//! A [`DataStore`] holds exactly one committed `(version, tree)` pair at a
//! time. Reads take a free snapshot; writes go through
//! `validate_and_prepare` and `commit`, which enforces that the commit is
//! based on the version the transaction saw. Serialization of commits is
//! the broker's job; the store only detects stale bases and swaps trees
//! atomically.

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::notify::{ChangeNotifier, DataTreeChange, ListenerHandle};
use crate::tree::DataTree;
use confplane_schema::{BindingCodec, DataPath, SchemaContext};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The two logical stores exposed by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalStore {
    /// Intended configuration, written by clients.
    Configuration,
    /// Observed state, written by the server and its services.
    Operational,
}

impl LogicalStore {
    pub fn name(&self) -> &'static str {
        match self {
            LogicalStore::Configuration => "CONFIG-DS",
            LogicalStore::Operational => "OPER-DS",
        }
    }
}

impl fmt::Display for LogicalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A point-in-time view of a store.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    /// Committed version the snapshot was taken at.
    pub version: u64,
    /// The committed tree.
    pub tree: DataTree,
}

impl StoreSnapshot {
    /// Reads the subtree at `path` from the snapshot.
    pub fn read(&self, path: &DataPath) -> Option<serde_json::Value> {
        self.tree.get(path)
    }
}

/// A validated candidate tree, ready for commit.
#[derive(Debug)]
pub struct PreparedWrite {
    store: LogicalStore,
    base_version: u64,
    candidate: DataTree,
}

impl PreparedWrite {
    /// The store this write targets.
    pub fn store(&self) -> LogicalStore {
        self.store
    }

    /// The committed version the candidate was derived from.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }
}

/// One logical in-memory data store.
pub struct DataStore {
    kind: LogicalStore,
    codec: BindingCodec,
    committed: RwLock<StoreSnapshot>,
    notifier: ChangeNotifier,
    commits_total: AtomicU64,
    conflicts_total: AtomicU64,
}

impl DataStore {
    /// Creates an empty store at version 0.
    pub fn new(
        kind: LogicalStore,
        schema: Arc<SchemaContext>,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self {
            kind,
            codec: BindingCodec::new(schema),
            committed: RwLock::new(StoreSnapshot {
                version: 0,
                tree: DataTree::new(),
            }),
            notifier: ChangeNotifier::new(kind, config),
            commits_total: AtomicU64::new(0),
            conflicts_total: AtomicU64::new(0),
        })
    }

    /// Returns which logical store this is.
    pub fn kind(&self) -> LogicalStore {
        self.kind
    }

    /// Returns the currently committed version.
    pub fn version(&self) -> u64 {
        self.committed.read().version
    }

    /// Takes a snapshot of the committed state. Never blocks on writers
    /// beyond the version/tree pointer copy.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.committed.read().clone()
    }

    /// Validates a candidate tree against the schema and binds it to the
    /// base version it was derived from.
    pub fn validate_and_prepare(
        &self,
        base_version: u64,
        candidate: DataTree,
    ) -> Result<PreparedWrite, StoreError> {
        self.codec
            .validate(&DataPath::root(), &candidate.to_value())?;
        Ok(PreparedWrite {
            store: self.kind,
            base_version,
            candidate,
        })
    }

    /// Atomically swaps the committed tree for the prepared candidate.
    ///
    /// Fails with a conflict if the store moved past the prepared write's
    /// base version; the committed state is left untouched in that case.
    pub fn commit(&self, prepared: PreparedWrite) -> Result<u64, StoreError> {
        let mut committed = self.committed.write();
        if committed.version != prepared.base_version {
            self.conflicts_total.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::Conflict {
                store: self.kind.name(),
                base: prepared.base_version,
                actual: committed.version,
            });
        }
        committed.version += 1;
        committed.tree = prepared.candidate;
        let change = DataTreeChange {
            store: self.kind,
            version: committed.version,
            tree: committed.tree.clone(),
        };
        let version = committed.version;
        drop(committed);

        self.commits_total.fetch_add(1, Ordering::Relaxed);
        self.notifier.publish(change);
        tracing::debug!("{} committed version {}", self.kind, version);
        Ok(version)
    }

    /// Registers a change listener; changes arrive in commit order.
    pub fn register_listener(&self) -> (ListenerHandle, mpsc::Receiver<DataTreeChange>) {
        self.notifier.register_listener()
    }

    /// Total successful commits.
    pub fn commits_total(&self) -> u64 {
        self.commits_total.load(Ordering::Relaxed)
    }

    /// Total commits rejected as conflicts.
    pub fn conflicts_total(&self) -> u64 {
        self.conflicts_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confplane_schema::ModelSource;
    use serde_json::json;

    fn schema() -> Arc<SchemaContext> {
        let source = ModelSource::from_json(&json!({
            "name": "example-system",
            "revision": "2024-02-01",
            "namespace": "urn:example:system",
            "nodes": {
                "system": {
                    "kind": "container",
                    "children": {
                        "hostname": {"kind": "leaf", "type": "string"},
                        "ntp-enabled": {"kind": "leaf", "type": "boolean"}
                    }
                }
            }
        }))
        .unwrap();
        SchemaContext::build(&[source]).unwrap()
    }

    fn store() -> DataStore {
        DataStore::new(
            LogicalStore::Configuration,
            schema(),
            &StoreConfig::default(),
        )
        .unwrap()
    }

    fn path(s: &str) -> DataPath {
        DataPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_prepare_and_commit() {
        let store = store();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.version, 0);

        let mut candidate = snapshot.tree.clone();
        candidate.put(&path("/system/hostname"), &json!("gw-1"));

        let prepared = store.validate_and_prepare(snapshot.version, candidate).unwrap();
        let version = store.commit(prepared).unwrap();
        assert_eq!(version, 1);
        assert_eq!(
            store.snapshot().read(&path("/system/hostname")),
            Some(json!("gw-1"))
        );
    }

    #[tokio::test]
    async fn test_stale_base_conflicts_and_leaves_store_unchanged() {
        let store = store();

        let base = store.snapshot();
        let mut first = base.tree.clone();
        first.put(&path("/system/hostname"), &json!("gw-1"));
        let prepared = store.validate_and_prepare(base.version, first).unwrap();
        store.commit(prepared).unwrap();

        // Second writer derived from the same stale base.
        let mut second = base.tree.clone();
        second.put(&path("/system/hostname"), &json!("gw-2"));
        let prepared = store.validate_and_prepare(base.version, second).unwrap();
        let err = store.commit(prepared).unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(store.version(), 1);
        assert_eq!(
            store.snapshot().read(&path("/system/hostname")),
            Some(json!("gw-1"))
        );
        assert_eq!(store.conflicts_total(), 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_unknown_node() {
        let store = store();
        let snapshot = store.snapshot();
        let mut candidate = snapshot.tree.clone();
        candidate.put(&path("/bogus"), &json!(1));

        let result = store.validate_and_prepare(snapshot.version, candidate);
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_snapshot_isolation() {
        let store = store();

        let before_a = store.snapshot();
        let before_b = store.snapshot();

        let mut candidate = before_a.tree.clone();
        candidate.put(&path("/system/ntp-enabled"), &json!(true));
        let prepared = store
            .validate_and_prepare(before_a.version, candidate)
            .unwrap();
        store.commit(prepared).unwrap();

        // Both pre-commit snapshots observe the old state.
        assert_eq!(before_a.read(&path("/system/ntp-enabled")), None);
        assert_eq!(before_b.read(&path("/system/ntp-enabled")), None);

        // A snapshot taken after the commit observes the new state.
        let after = store.snapshot();
        assert_eq!(after.read(&path("/system/ntp-enabled")), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_commit_notifies_listeners() {
        let store = store();
        let (_handle, mut rx) = store.register_listener();

        let snapshot = store.snapshot();
        let mut candidate = snapshot.tree.clone();
        candidate.put(&path("/system/hostname"), &json!("gw-1"));
        let prepared = store
            .validate_and_prepare(snapshot.version, candidate)
            .unwrap();
        store.commit(prepared).unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.version, 1);
        assert_eq!(change.store, LogicalStore::Configuration);
        assert_eq!(
            change.tree.get(&path("/system/hostname")),
            Some(json!("gw-1"))
        );
    }
}
