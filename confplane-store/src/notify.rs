//! Change-notification fan-out.
//!
//! Each store owns one notifier. The commit path hands a change to the
//! notifier with a non-blocking send into a bounded queue; a forwarder
//! task fans it out to every registered listener, again non-blocking.
//! A full queue drops the newest change and logs it; notifications are
//! best-effort and must never block or slow a commit.

use crate::config::StoreConfig;
use crate::store::LogicalStore;
use crate::tree::DataTree;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A committed change to a store, delivered to listeners in commit order.
#[derive(Debug, Clone)]
pub struct DataTreeChange {
    /// Which store committed.
    pub store: LogicalStore,
    /// The version produced by the commit.
    pub version: u64,
    /// The committed tree.
    pub tree: DataTree,
}

struct NotifierInner {
    store: LogicalStore,
    listener_capacity: usize,
    listeners: RwLock<HashMap<u64, mpsc::Sender<DataTreeChange>>>,
    next_listener_id: AtomicU64,
    dropped_total: AtomicU64,
}

/// Handle returned by listener registration; dropping it unsubscribes.
pub struct ListenerHandle {
    id: u64,
    inner: Arc<NotifierInner>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.inner.listeners.write().remove(&self.id);
    }
}

/// Bounded, asynchronous change fan-out for one store.
pub struct ChangeNotifier {
    inner: Arc<NotifierInner>,
    queue_tx: mpsc::Sender<DataTreeChange>,
}

impl ChangeNotifier {
    /// Creates the notifier and spawns its forwarder task.
    ///
    /// Fan-out preserves commit order, so exactly one forwarder drains the
    /// queue regardless of the configured pool size.
    pub fn new(store: LogicalStore, config: &StoreConfig) -> Self {
        if config.max_data_change_executor_pool_size > 1 {
            tracing::warn!(
                "{} notifier: pool size {} clamped to 1 to preserve commit order",
                store,
                config.max_data_change_executor_pool_size
            );
        }

        let inner = Arc::new(NotifierInner {
            store,
            listener_capacity: config.listener_queue_capacity(),
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            dropped_total: AtomicU64::new(0),
        });

        let (queue_tx, mut queue_rx) = mpsc::channel(config.executor_queue_capacity());

        let forwarder = inner.clone();
        tokio::spawn(async move {
            while let Some(change) = queue_rx.recv().await {
                forwarder.fan_out(change);
            }
            tracing::debug!("{} notifier stopped", forwarder.store);
        });

        Self { inner, queue_tx }
    }

    /// Registers a listener, returning its handle and change stream.
    pub fn register_listener(&self) -> (ListenerHandle, mpsc::Receiver<DataTreeChange>) {
        let (tx, rx) = mpsc::channel(self.inner.listener_capacity);
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().insert(id, tx);
        (
            ListenerHandle {
                id,
                inner: self.inner.clone(),
            },
            rx,
        )
    }

    /// Hands a committed change to the forwarder without blocking.
    pub fn publish(&self, change: DataTreeChange) {
        if let Err(mpsc::error::TrySendError::Full(change)) = self.queue_tx.try_send(change) {
            self.inner.dropped_total.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "{} notifier queue full, dropping change for version {}",
                self.inner.store,
                change.version
            );
        }
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Returns the number of changes dropped at the forwarder queue.
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }
}

impl NotifierInner {
    fn fan_out(&self, change: DataTreeChange) {
        let mut closed = Vec::new();
        {
            let listeners = self.listeners.read();
            for (id, tx) in listeners.iter() {
                match tx.try_send(change.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped_total.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            "{} listener {} queue full, dropping change for version {}",
                            self.store,
                            id,
                            change.version
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        if !closed.is_empty() {
            let mut listeners = self.listeners.write();
            for id in closed {
                listeners.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confplane_schema::DataPath;
    use serde_json::json;

    fn change(version: u64) -> DataTreeChange {
        let mut tree = DataTree::new();
        tree.put(&DataPath::parse("/v").unwrap(), &json!(version));
        DataTreeChange {
            store: LogicalStore::Operational,
            version,
            tree,
        }
    }

    #[tokio::test]
    async fn test_listener_receives_in_order() {
        let notifier = ChangeNotifier::new(LogicalStore::Operational, &StoreConfig::default());
        let (_handle, mut rx) = notifier.register_listener();

        notifier.publish(change(1));
        notifier.publish(change(2));

        assert_eq!(rx.recv().await.unwrap().version, 1);
        assert_eq!(rx.recv().await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_drop_handle_unsubscribes() {
        let notifier = ChangeNotifier::new(LogicalStore::Configuration, &StoreConfig::default());
        let (handle, _rx) = notifier.register_listener();
        assert_eq!(notifier.listener_count(), 1);

        drop(handle);
        assert_eq!(notifier.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_full_listener_queue_drops_not_blocks() {
        let config = StoreConfig {
            max_data_change_listener_queue_size: 1,
            ..Default::default()
        };
        let notifier = ChangeNotifier::new(LogicalStore::Operational, &config);
        let (_handle, mut rx) = notifier.register_listener();

        // Nobody drains rx; flood well past every queue bound. publish()
        // must never block the caller.
        for version in 1..=16 {
            notifier.publish(change(version));
            tokio::task::yield_now().await;
        }

        // The first change made it through; later ones were dropped.
        assert_eq!(rx.recv().await.unwrap().version, 1);
        assert!(notifier.dropped_total() > 0);
    }
}
