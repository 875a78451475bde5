//! Agent control server.
//!
//! Run with: cargo run -p agent-control-server
//!
//! Agents connect to `ws://<host>:<port>/agent`, observers to `/observe`, and
//! operators use the HTTP API under `/api`.

mod settings;

use std::{net::SocketAddr, sync::Arc};

use agent_control_core::LocationStore;
use agent_control_session::{
    ControlManager,
    storage::{JsonFileLocationStore, MemoryLocationStore},
};
use agent_control_transport::create_router;
use anyhow::Context;
use settings::{Settings, StorageBackend};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn location_store(settings: &Settings) -> Arc<dyn LocationStore> {
    match settings.storage.backend {
        StorageBackend::File => {
            tracing::info!(dir = %settings.storage.data_dir.display(), "storing locations on disk");
            Arc::new(JsonFileLocationStore::new(settings.storage.data_dir.clone()))
        }
        StorageBackend::Memory => {
            tracing::warn!("storing locations in memory; history is lost on restart");
            Arc::new(MemoryLocationStore::new())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    init_tracing(&settings.log.level);

    let manager = Arc::new(ControlManager::new(
        settings.control_config(),
        location_store(&settings),
    ));
    let monitor = manager.spawn_status_monitor(settings.sweep_interval());

    let app = create_router(Arc::clone(&manager));

    let addr = settings
        .server
        .addr()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    if let Some(monitor) = monitor {
        monitor.abort();
    }
    tracing::info!("Server stopped");
    Ok(())
}
