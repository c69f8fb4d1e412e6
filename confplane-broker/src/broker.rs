//! The serialized data broker.
//!
//! Every write submission against either store funnels through one
//! bounded FIFO queue drained by a single worker, so commit order equals
//! submission order and at most one commit is in flight at a time. This
//! trades per-store parallelism for deterministic serialization, which is
//! exactly what the management plane wants.

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::transaction::{ReadTransaction, ReadWriteTransaction, StagedWrite, WriteTransaction};
use confplane_store::{DataStore, LogicalStore, StoreError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, Notify};

/// Versions produced by a successful commit, one per touched store.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    pub versions: Vec<(LogicalStore, u64)>,
}

impl CommitOutcome {
    /// Returns the committed version for a store, if it was touched.
    pub fn version(&self, store: LogicalStore) -> Option<u64> {
        self.versions
            .iter()
            .find(|(s, _)| *s == store)
            .map(|(_, v)| *v)
    }
}

/// Resolves when the broker worker has applied (or refused) the commit.
#[derive(Debug)]
pub struct CommitFuture {
    rx: oneshot::Receiver<Result<CommitOutcome, BrokerError>>,
}

impl Future for CommitFuture {
    type Output = Result<CommitOutcome, BrokerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(BrokerError::BrokerStopped)))
    }
}

struct CommitTask {
    txn_id: u64,
    writes: Vec<(LogicalStore, StagedWrite)>,
    done: oneshot::Sender<Result<CommitOutcome, BrokerError>>,
}

/// Fronts both logical stores with a single serialization point.
pub struct DataBroker {
    config_store: Arc<DataStore>,
    oper_store: Arc<DataStore>,
    submit_tx: mpsc::Sender<CommitTask>,
    queue_capacity: usize,
    txn_ids: AtomicU64,
    shutdown: AtomicBool,
    shutdown_notify: Arc<Notify>,
    submitted_total: AtomicU64,
    rejected_total: AtomicU64,
}

impl DataBroker {
    /// Creates the broker and spawns its commit worker.
    ///
    /// Fails fast on invalid pool configuration instead of deferring to
    /// first use.
    pub fn new(
        config: BrokerConfig,
        config_store: Arc<DataStore>,
        oper_store: Arc<DataStore>,
    ) -> Result<Arc<Self>, BrokerError> {
        config.validate()?;

        let (submit_tx, submit_rx) = mpsc::channel(config.max_queue_size);
        let shutdown_notify = Arc::new(Notify::new());

        let broker = Arc::new(Self {
            config_store: config_store.clone(),
            oper_store: oper_store.clone(),
            submit_tx,
            queue_capacity: config.max_queue_size,
            txn_ids: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            shutdown_notify: shutdown_notify.clone(),
            submitted_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
        });

        tokio::spawn(Self::commit_worker(
            config_store,
            oper_store,
            submit_rx,
            shutdown_notify,
        ));

        Ok(broker)
    }

    /// Opens a read-only transaction over snapshots of both stores.
    pub fn new_read_transaction(&self) -> ReadTransaction {
        ReadTransaction::new(self.config_store.snapshot(), self.oper_store.snapshot())
    }

    /// Opens a write-only transaction based on the current snapshots.
    pub fn new_write_transaction(&self) -> WriteTransaction {
        let id = self.txn_ids.fetch_add(1, Ordering::Relaxed);
        WriteTransaction::new(id, self.config_store.snapshot(), self.oper_store.snapshot())
    }

    /// Opens a read-write transaction based on the current snapshots.
    pub fn new_read_write_transaction(&self) -> ReadWriteTransaction {
        ReadWriteTransaction::new(self.new_write_transaction())
    }

    /// Submits a write transaction to the commit queue.
    ///
    /// Returns immediately: the future resolves once the worker applied
    /// the commit. A full queue fails with `CapacityExceeded` right away
    /// rather than blocking the caller.
    pub fn submit(&self, txn: impl Into<WriteTransaction>) -> Result<CommitFuture, BrokerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(BrokerError::ShuttingDown);
        }

        let txn = txn.into();
        let mut writes = Vec::new();
        if txn.config.dirty {
            writes.push((LogicalStore::Configuration, txn.config.clone()));
        }
        if txn.operational.dirty {
            writes.push((LogicalStore::Operational, txn.operational.clone()));
        }

        let (done_tx, done_rx) = oneshot::channel();
        let task = CommitTask {
            txn_id: txn.id,
            writes,
            done: done_tx,
        };

        match self.submit_tx.try_send(task) {
            Ok(()) => {
                self.submitted_total.fetch_add(1, Ordering::Relaxed);
                Ok(CommitFuture { rx: done_rx })
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.rejected_total.fetch_add(1, Ordering::Relaxed);
                Err(BrokerError::CapacityExceeded {
                    capacity: self.queue_capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BrokerError::ShuttingDown),
        }
    }

    async fn commit_worker(
        config_store: Arc<DataStore>,
        oper_store: Arc<DataStore>,
        mut submit_rx: mpsc::Receiver<CommitTask>,
        shutdown: Arc<Notify>,
    ) {
        loop {
            let task = tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                task = submit_rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let result = Self::apply(&config_store, &oper_store, task.writes);
            if let Err(e) = &result {
                tracing::debug!("transaction {} failed: {}", task.txn_id, e);
            }
            // The submitter may have dropped its future; that is fine.
            let _ = task.done.send(result);
        }
        tracing::debug!("broker commit worker stopped");
    }

    /// Applies one transaction: prepare every touched store, then commit.
    /// Preparing everything first means a validation failure or stale
    /// base never leaves a partial commit behind.
    fn apply(
        config_store: &DataStore,
        oper_store: &DataStore,
        writes: Vec<(LogicalStore, StagedWrite)>,
    ) -> Result<CommitOutcome, BrokerError> {
        let mut prepared = Vec::with_capacity(writes.len());
        for (store, staged) in writes {
            let target = match store {
                LogicalStore::Configuration => config_store,
                LogicalStore::Operational => oper_store,
            };
            // A stale base fails here, before anything is committed: the
            // worker is the only committer, so versions cannot move between
            // this check and the commits below.
            let actual = target.version();
            if actual != staged.base_version {
                return Err(BrokerError::Store(StoreError::Conflict {
                    store: store.name(),
                    base: staged.base_version,
                    actual,
                }));
            }
            prepared.push((
                store,
                target.validate_and_prepare(staged.base_version, staged.candidate)?,
            ));
        }

        let mut outcome = CommitOutcome::default();
        for (store, write) in prepared {
            let target = match store {
                LogicalStore::Configuration => config_store,
                LogicalStore::Operational => oper_store,
            };
            let version = target.commit(write)?;
            outcome.versions.push((store, version));
        }
        Ok(outcome)
    }

    /// Stops accepting submissions and halts the worker. Queued tasks
    /// resolve as `BrokerStopped`.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.shutdown_notify.notify_one();
    }

    /// Total accepted submissions.
    pub fn submitted_total(&self) -> u64 {
        self.submitted_total.load(Ordering::Relaxed)
    }

    /// Total submissions rejected for capacity.
    pub fn rejected_total(&self) -> u64 {
        self.rejected_total.load(Ordering::Relaxed)
    }
}
