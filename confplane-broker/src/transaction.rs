//! Broker transactions.
//!
//! A transaction is a handle over a point-in-time snapshot of one or both
//! stores, taken when the transaction is created. Write transactions
//! accumulate put/merge/delete operations against a private candidate
//! copy; nothing is visible to anyone else until the broker commits the
//! submission. Termination (submit or cancel) consumes the transaction,
//! so use-after-termination is a compile error rather than a runtime one.

use confplane_schema::DataPath;
use confplane_store::{DataTree, LogicalStore, StoreSnapshot};
use serde_json::Value;

/// A read-only view over both stores.
pub struct ReadTransaction {
    pub(crate) config: StoreSnapshot,
    pub(crate) operational: StoreSnapshot,
}

impl ReadTransaction {
    pub(crate) fn new(config: StoreSnapshot, operational: StoreSnapshot) -> Self {
        Self {
            config,
            operational,
        }
    }

    /// Reads the subtree at `path` from the chosen store's snapshot.
    pub fn read(&self, store: LogicalStore, path: &DataPath) -> Option<Value> {
        self.snapshot(store).read(path)
    }

    /// Returns the snapshot backing the chosen store.
    pub fn snapshot(&self, store: LogicalStore) -> &StoreSnapshot {
        match store {
            LogicalStore::Configuration => &self.config,
            LogicalStore::Operational => &self.operational,
        }
    }
}

/// Staged writes against one store.
#[derive(Debug, Clone)]
pub(crate) struct StagedWrite {
    pub(crate) base_version: u64,
    pub(crate) candidate: DataTree,
    pub(crate) dirty: bool,
}

/// A write-only transaction staging changes to one or both stores.
pub struct WriteTransaction {
    pub(crate) id: u64,
    pub(crate) config: StagedWrite,
    pub(crate) operational: StagedWrite,
}

impl WriteTransaction {
    pub(crate) fn new(id: u64, config: StoreSnapshot, operational: StoreSnapshot) -> Self {
        Self {
            id,
            config: StagedWrite {
                base_version: config.version,
                candidate: config.tree,
                dirty: false,
            },
            operational: StagedWrite {
                base_version: operational.version,
                candidate: operational.tree,
                dirty: false,
            },
        }
    }

    /// Returns the transaction id, unique for the broker's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn staged(&self, store: LogicalStore) -> &StagedWrite {
        match store {
            LogicalStore::Configuration => &self.config,
            LogicalStore::Operational => &self.operational,
        }
    }

    fn staged_mut(&mut self, store: LogicalStore) -> &mut StagedWrite {
        match store {
            LogicalStore::Configuration => &mut self.config,
            LogicalStore::Operational => &mut self.operational,
        }
    }

    /// Replaces the subtree at `path` in the chosen store's candidate.
    pub fn put(&mut self, store: LogicalStore, path: &DataPath, value: &Value) {
        let staged = self.staged_mut(store);
        staged.candidate.put(path, value);
        staged.dirty = true;
    }

    /// Deep-merges `value` at `path` in the chosen store's candidate.
    pub fn merge(&mut self, store: LogicalStore, path: &DataPath, value: &Value) {
        let staged = self.staged_mut(store);
        staged.candidate.merge(path, value);
        staged.dirty = true;
    }

    /// Deletes the subtree at `path` in the chosen store's candidate.
    /// Returns false if nothing existed there.
    pub fn delete(&mut self, store: LogicalStore, path: &DataPath) -> bool {
        let staged = self.staged_mut(store);
        let existed = staged.candidate.delete(path);
        staged.dirty |= existed;
        existed
    }

    /// Returns true if no store was touched.
    pub fn is_empty(&self) -> bool {
        !self.config.dirty && !self.operational.dirty
    }

    /// Abandons the transaction; staged changes are discarded.
    pub fn cancel(self) {
        tracing::debug!("transaction {} cancelled", self.id);
    }
}

/// A transaction that reads its own staged writes.
pub struct ReadWriteTransaction {
    write: WriteTransaction,
}

impl ReadWriteTransaction {
    pub(crate) fn new(write: WriteTransaction) -> Self {
        Self { write }
    }

    /// Returns the transaction id, unique for the broker's lifetime.
    pub fn id(&self) -> u64 {
        self.write.id()
    }

    /// Reads from the candidate, observing this transaction's own writes.
    pub fn read(&self, store: LogicalStore, path: &DataPath) -> Option<Value> {
        self.write.staged(store).candidate.get(path)
    }

    /// Replaces the subtree at `path` in the chosen store's candidate.
    pub fn put(&mut self, store: LogicalStore, path: &DataPath, value: &Value) {
        self.write.put(store, path, value);
    }

    /// Deep-merges `value` at `path` in the chosen store's candidate.
    pub fn merge(&mut self, store: LogicalStore, path: &DataPath, value: &Value) {
        self.write.merge(store, path, value);
    }

    /// Deletes the subtree at `path` in the chosen store's candidate.
    pub fn delete(&mut self, store: LogicalStore, path: &DataPath) -> bool {
        self.write.delete(store, path)
    }

    /// Abandons the transaction; staged changes are discarded.
    pub fn cancel(self) {
        self.write.cancel();
    }
}

impl From<ReadWriteTransaction> for WriteTransaction {
    fn from(txn: ReadWriteTransaction) -> Self {
        txn.write
    }
}
