//! CryoLive live-processing orchestrator server.
//!
//! Boots the persistence layer, wires the Live Session Orchestrator and
//! SLURM Monitor to it and to each other through the Progress Bus, then
//! serves the HTTP/WebSocket adapter. Follows the teacher's `main.rs` boot
//! sequence: parse args/env, build the long-lived services, spawn their
//! background loops, build the router, serve.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cryolive_config::Config;
use cryolive_core::job_store::memory::InMemoryStore;
use cryolive_core::job_store::postgres::PostgresStore;
use cryolive_core::{
    LiveOrchestrator, OrchestratorConfig, ProcessCommandExecutor, ProgressBus, SchedulerClient,
    SlurmMonitor, StatsFileResultAdapter,
};
use cryolive_contracts::{ActivityStore, JobStore, SessionStore, UserStore};
use cryolive_server::{create_app, AppState};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cryolive_server=info,cryolive_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("cryolive-server starting up");

    let config = Arc::new(config);

    let (session_store, job_store, activity_store, user_store) = build_stores(&config).await?;

    let bus = ProgressBus::new();
    let executor = Arc::new(ProcessCommandExecutor::new(COMMAND_TIMEOUT));
    let scheduler = SchedulerClient::new(executor);
    let result_adapter = Arc::new(StatsFileResultAdapter::new());

    let orchestrator = LiveOrchestrator::new(
        session_store,
        job_store.clone(),
        activity_store.clone(),
        result_adapter.clone(),
        scheduler.clone(),
        bus.clone(),
        OrchestratorConfig {
            base_output_dir: config.data_dir.clone(),
            watch_poll_interval: config.watch_debounce,
            ..OrchestratorConfig::default()
        },
    );

    let monitor = Arc::new(SlurmMonitor::new(
        job_store.clone(),
        result_adapter,
        scheduler,
        bus,
        config.monitor_poll_interval,
        config.ghost_job_miss_threshold,
    ));
    let (monitor_shutdown_tx, monitor_shutdown_rx) = tokio::sync::watch::channel(false);
    let monitor_handle = tokio::spawn(monitor.clone().run(monitor_shutdown_rx));

    let websocket_manager = Arc::new(cryolive_server::websocket::ConnectionManager::new(
        config.max_ws_connections,
    ));

    let (forwarder_shutdown_tx, forwarder_shutdown_rx) = tokio::sync::watch::channel(false);
    let forwarder_handle = tokio::spawn(cryolive_server::websocket::run_event_forwarder(
        websocket_manager.clone(),
        orchestrator.clone(),
        forwarder_shutdown_rx,
    ));

    let state = AppState {
        orchestrator,
        job_store,
        activity_store,
        user_store,
        websocket_manager,
        config: config.clone(),
    };

    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    let _ = monitor_shutdown_tx.send(true);
    let _ = monitor_handle.await;
    let _ = forwarder_shutdown_tx.send(true);
    let _ = forwarder_handle.await;

    Ok(())
}

type Stores = (
    Arc<dyn SessionStore>,
    Arc<dyn JobStore>,
    Arc<dyn ActivityStore>,
    Arc<dyn UserStore>,
);

/// Connects to Postgres and runs migrations when `DATABASE_URL` is set,
/// otherwise falls back to the in-memory store — convenient for local
/// development and for the `e2e`-gated test suite, never used when a real
/// database is configured.
async fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("connecting to Postgres");
            let store = PostgresStore::connect(url).await?;
            store.migrate().await?;
            let store = Arc::new(store);
            Ok((store.clone(), store.clone(), store.clone(), store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using an in-memory store (not for production)");
            let store = Arc::new(InMemoryStore::new());
            Ok((store.clone(), store.clone(), store.clone(), store))
        }
    }
}
