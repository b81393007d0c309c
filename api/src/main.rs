use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;

mod handlers;
mod routes;
mod state;

use database_manager::config::Settings;
use database_manager::db::PgConnector;
use database_manager::lifecycle::shutdown_signal;
use database_manager::resolver::EnvSnapshot;
use database_manager::telemetry;
use database_manager::DatabaseManager;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(&config.observability.log_level, config.observability.json_logs)?;
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Configuration loaded"
    );

    if let Some(port) = config.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    // Every database must be reachable before the listener binds
    let manager = DatabaseManager::startup(&config, &EnvSnapshot::capture(), Arc::new(PgConnector))
        .await
        .context("Database startup failed")?;
    let manager = Arc::new(manager);

    let app = routes::create_router(AppState::new(Arc::clone(&manager)));

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .context("Invalid server host")?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Pools are closed even if the server stopped on an error
    let report = manager.shutdown().await;
    if !report.is_clean() {
        tracing::warn!(undrained = ?report.undrained, "Shutdown finished with outstanding leases");
    }

    served.context("HTTP server failed")?;
    tracing::info!("API server stopped");
    Ok(())
}
