//! Relay service entry point.
//!
//! WebSocket pub/sub relay with bounded per-channel history.

use anyhow::Result;
use message_store::MessageStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use relay::{serve, AppState, ConnectionManager, RelayConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting relay");

    let config = RelayConfig::from_env()?;

    info!("Configuration:");
    info!("  PORT: {}", config.port);
    info!("  METRICS_PORT: {:?}", config.metrics_port);
    info!("  MAX_MESSAGES_PER_CHANNEL: {}", config.max_messages_per_channel);
    info!("  PING_INTERVAL_SECS: {}", config.ping_interval.as_secs());

    // Start Prometheus metrics server
    if let Some(metrics_port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics_port))
            .install()?;
        info!("Prometheus metrics server started on port {}", metrics_port);
    }

    let store = MessageStore::with_config(config.store_config());
    let manager = Arc::new(ConnectionManager::new(store.clone()));
    let state = Arc::new(AppState::new(manager, config.ping_interval));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Relay listening on {}", addr);
    info!("  websocat \"ws://localhost:{}/_ws/\"", config.port);
    info!(
        "  curl -X POST -d \"domain=http://blah.com&channel=test&message=Hello\" \"http://localhost:{}/broadcast\"",
        config.port
    );

    // Run server with graceful shutdown
    serve(listener, state, shutdown_signal()).await?;

    let stats = store.stats();
    info!(
        "Relay stopped: {} domain(s), {} channel(s), {} message(s) retained, {} added, {} evicted",
        stats.domain_count,
        stats.channel_count,
        stats.message_count,
        stats.total_added,
        stats.total_evicted
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
