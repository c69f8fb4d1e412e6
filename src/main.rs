//! confplane - Schema-aware management-plane server.
//!
//! Compiles configured models into a schema context, stands up the
//! transactional data stores and broker, and serves the management
//! protocol over TCP.

use confplane_broker::{DataBroker, OperationServiceAggregator, RpcRouter};
use confplane_schema::{ModelSource, SchemaContext};
use confplane_server::{
    monitoring_model_source, Authenticator, Config, LifecycleManager, MonitoringPublisher,
    ProtocolServer, RequestHandler, SessionSource,
};
use confplane_store::{DataStore, LogicalStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if CONFPLANE_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("CONFPLANE_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("CONFPLANE_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    // The listener and every connection task run on a fixed-size I/O
    // pool sized by configuration.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.max_io_threads)
        .thread_name("confplane-io")
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting confplane server");
    tracing::info!("  Bind address: {}", config.server.bind_addr());
    tracing::info!("  Models configured: {}", config.schema.model_paths.len());

    // Compile the schema context. A model that fails to compile aborts
    // startup; the server never runs with a partial schema.
    let mut sources = vec![monitoring_model_source()?];
    for path in &config.schema.model_paths {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("Failed to read model {}: {}", path.display(), e);
                return Err(e.into());
            }
        };
        let source = match ModelSource::from_str(&text) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to parse model {}: {}", path.display(), e);
                return Err(e.into());
            }
        };
        tracing::info!("  Loaded model '{}' from {}", source.name, path.display());
        sources.push(source);
    }
    let schema = match SchemaContext::build(&sources) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Schema compilation failed: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Schema context ready ({} modules)", schema.module_count());

    // Data stores and broker
    let config_store = Arc::new(DataStore::new(
        LogicalStore::Configuration,
        schema.clone(),
        &config.store,
    )?);
    let oper_store = Arc::new(DataStore::new(
        LogicalStore::Operational,
        schema.clone(),
        &config.store,
    )?);
    let broker = DataBroker::new(config.broker.clone(), config_store, oper_store)?;

    // RPC routing and operation services
    let router = RpcRouter::new();
    let aggregator = OperationServiceAggregator::new();

    let handler = Arc::new(RequestHandler::new(
        broker.clone(),
        router.clone(),
        aggregator.clone(),
        Authenticator::new(&config.server),
    ));

    // Protocol server
    let server = ProtocolServer::new(config.server.clone(), handler);
    let addr = match server.start().await {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("confplane listening on {}", addr);

    // Monitoring publisher
    let publisher = MonitoringPublisher::new(
        broker.clone(),
        server.clone() as Arc<dyn SessionSource>,
        aggregator.clone(),
        config.monitoring.clone(),
    );
    let monitor_task = tokio::spawn(publisher.clone().run());

    // Components close in reverse registration order on shutdown.
    let lifecycle = LifecycleManager::new();
    {
        let broker = broker.clone();
        lifecycle.register_fn("data-broker", move || async move {
            broker.shutdown();
            Ok(())
        });
    }
    {
        let server = server.clone();
        lifecycle.register_fn("protocol-server", move || async move {
            server.stop().await;
            Ok(())
        });
    }
    {
        let publisher = publisher.clone();
        lifecycle.register_fn("monitoring-publisher", move || async move {
            publisher.shutdown();
            Ok(())
        });
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    lifecycle.shutdown().await;
    let _ = monitor_task.await;

    tracing::info!("confplane stopped");
    Ok(())
}
