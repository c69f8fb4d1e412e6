//! Periodic publication of server state into the operational store.
//!
//! The publisher snapshots active sessions and advertised capabilities
//! on a fixed interval and writes them under `/monitoring` through the
//! broker, so clients read server state the same way they read any
//! other operational data. A failed update is logged and the next
//! interval tries again.

use crate::config::MonitoringConfig;
use crate::error::ServerError;
use crate::server::SessionInfo;
use confplane_broker::{DataBroker, OperationServiceAggregator};
use confplane_schema::{DataPath, ModelSource, SchemaError};
use confplane_store::LogicalStore;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Where the publisher gets its session snapshots from.
pub trait SessionSource: Send + Sync {
    fn session_snapshot(&self) -> Vec<SessionInfo>;
}

impl SessionSource for crate::server::ProtocolServer {
    fn session_snapshot(&self) -> Vec<SessionInfo> {
        crate::server::ProtocolServer::session_snapshot(self)
    }
}

/// The schema module backing `/monitoring`. Compiled into the context
/// at startup alongside the configured models.
pub fn monitoring_model_source() -> Result<ModelSource, SchemaError> {
    ModelSource::from_json(&json!({
        "name": "confplane-monitoring",
        "revision": "2024-03-01",
        "namespace": "urn:confplane:monitoring",
        "nodes": {
            "monitoring": {
                "kind": "container",
                "children": {
                    "sessions": {"kind": "leaf", "type": "any-json"},
                    "capabilities": {"kind": "leaf", "type": "any-json"},
                    "updated-at": {"kind": "leaf", "type": "string"}
                }
            }
        }
    }))
}

/// Publishes session and capability state to the operational store on
/// a fixed interval.
pub struct MonitoringPublisher {
    broker: Arc<DataBroker>,
    sessions: Arc<dyn SessionSource>,
    aggregator: OperationServiceAggregator,
    config: MonitoringConfig,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    updates_published: AtomicU64,
    updates_failed: AtomicU64,
}

impl MonitoringPublisher {
    pub fn new(
        broker: Arc<DataBroker>,
        sessions: Arc<dyn SessionSource>,
        aggregator: OperationServiceAggregator,
        config: MonitoringConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            sessions,
            aggregator,
            config,
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            updates_published: AtomicU64::new(0),
            updates_failed: AtomicU64::new(0),
        })
    }

    /// Runs the publish loop until shutdown.
    ///
    /// A zero interval disables publishing for the server's lifetime;
    /// there is no way to enable it without a restart.
    pub async fn run(self: Arc<Self>) {
        if self.config.is_disabled() {
            tracing::info!("monitoring publisher disabled (update interval is 0)");
            return;
        }

        let interval = self.config.update_interval();
        tracing::info!("monitoring publisher started, interval {:?}", interval);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notify.notified() => break,
                _ = tokio::time::sleep(interval) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    match self.publish().await {
                        Ok(()) => {
                            self.updates_published.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            self.updates_failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("monitoring update failed: {}", e);
                        }
                    }
                }
            }
        }
        tracing::info!("monitoring publisher stopped");
    }

    async fn publish(&self) -> Result<(), ServerError> {
        let sessions = self.sessions.session_snapshot();
        let capabilities: Vec<String> = self
            .aggregator
            .current_capabilities()
            .into_iter()
            .map(|c| c.0)
            .collect();

        let mut txn = self.broker.new_write_transaction();
        txn.put(
            LogicalStore::Operational,
            &DataPath::parse("/monitoring/sessions")
                .map_err(|e| ServerError::InvalidRequest(e.to_string()))?,
            &serde_json::to_value(&sessions)?,
        );
        txn.put(
            LogicalStore::Operational,
            &DataPath::parse("/monitoring/capabilities")
                .map_err(|e| ServerError::InvalidRequest(e.to_string()))?,
            &json!(capabilities),
        );
        txn.put(
            LogicalStore::Operational,
            &DataPath::parse("/monitoring/updated-at")
                .map_err(|e| ServerError::InvalidRequest(e.to_string()))?,
            &json!(chrono::Utc::now().to_rfc3339()),
        );

        let outcome = self.broker.submit(txn)?.await?;
        tracing::debug!(
            "monitoring update published, {} sessions, OPER-DS v{}",
            sessions.len(),
            outcome.version(LogicalStore::Operational).unwrap_or(0)
        );
        Ok(())
    }

    /// Stops the publish loop. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.shutdown_notify.notify_one();
    }

    /// Updates published since startup.
    pub fn updates_published(&self) -> u64 {
        self.updates_published.load(Ordering::Relaxed)
    }

    /// Updates that failed since startup.
    pub fn updates_failed(&self) -> u64 {
        self.updates_failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confplane_broker::BrokerConfig;
    use confplane_schema::SchemaContext;
    use confplane_store::{DataStore, StoreConfig};
    use std::time::Duration;

    struct StubSessions;

    impl SessionSource for StubSessions {
        fn session_snapshot(&self) -> Vec<SessionInfo> {
            vec![SessionInfo {
                id: 1,
                remote_addr: "127.0.0.1:40000".to_string(),
                client_name: Some("cli".to_string()),
                state: "ESTABLISHED".to_string(),
                request_count: 3,
            }]
        }
    }

    fn broker() -> Arc<DataBroker> {
        let schema = SchemaContext::build(&[monitoring_model_source().unwrap()]).unwrap();
        let config_store = Arc::new(
            DataStore::new(
                LogicalStore::Configuration,
                schema.clone(),
                &StoreConfig::default(),
            )
            .unwrap(),
        );
        let oper_store = Arc::new(
            DataStore::new(LogicalStore::Operational, schema, &StoreConfig::default()).unwrap(),
        );
        DataBroker::new(BrokerConfig::default(), config_store, oper_store).unwrap()
    }

    fn publisher(broker: Arc<DataBroker>, interval_secs: u64) -> Arc<MonitoringPublisher> {
        MonitoringPublisher::new(
            broker,
            Arc::new(StubSessions),
            OperationServiceAggregator::new(),
            MonitoringConfig {
                update_interval_secs: interval_secs,
                ..MonitoringConfig::default()
            },
        )
    }

    fn read_monitoring(broker: &DataBroker) -> Option<serde_json::Value> {
        broker
            .new_read_transaction()
            .read(
                LogicalStore::Operational,
                &DataPath::parse("/monitoring").unwrap(),
            )
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_publisher_never_writes() {
        let broker = broker();
        let publisher = publisher(broker.clone(), 0);

        let handle = tokio::spawn(publisher.clone().run());
        tokio::time::advance(Duration::from_secs(600)).await;

        // The loop exits immediately when disabled.
        handle.await.unwrap();
        assert!(read_monitoring(&broker).is_none());
        assert_eq!(publisher.updates_published(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_on_interval() {
        let broker = broker();
        let publisher = publisher(broker.clone(), 10);

        tokio::spawn(publisher.clone().run());

        tokio::time::advance(Duration::from_secs(11)).await;
        // Let the publish and commit tasks run to completion.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let data = read_monitoring(&broker).expect("monitoring data should exist");
        assert_eq!(data["sessions"][0]["id"], 1);
        assert_eq!(data["sessions"][0]["state"], "ESTABLISHED");
        assert!(data["updated-at"].is_string());
        assert!(publisher.updates_published() >= 1);

        publisher.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let broker = broker();
        let publisher = publisher(broker.clone(), 10);

        let handle = tokio::spawn(publisher.clone().run());
        publisher.shutdown();
        handle.await.unwrap();
    }
}
