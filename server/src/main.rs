use std::sync::Arc;

use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use validator_executors::metrics::{NonceTrackerMetrics, initialize_metrics};
use validator_node::{
    ValidatorServer, ValidatorServerState, build_trackers,
    config::{self, LogFormat},
    store::NonceStoreBackend,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::get_config()?;

    let subscriber = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "validator_node=debug,validator_executors=debug,validator_core=debug,tower_http=debug"
                .into()
        }),
    );

    match config.server.log_format {
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    let metrics_registry = Arc::new(prometheus::Registry::new());
    initialize_metrics(NonceTrackerMetrics::new(&metrics_registry)?);
    tracing::info!("Nonce tracker metrics registered");

    let store = NonceStoreBackend::from_config(&config).await?;
    let trackers = Arc::new(build_trackers(&config, store).await?);
    tracing::info!(count = trackers.len(), "Nonce trackers initialized");

    let mut server = ValidatorServer::new(ValidatorServerState {
        trackers: trackers.clone(),
        metrics_registry,
    });

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    server.start(listener)?;

    tracing::info!("Server started, waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Shutdown signal received");

    if let Err(e) = server.shutdown().await {
        tracing::error!("Error during server shutdown: {}", e);
    } else {
        tracing::info!("HTTP server shut down successfully");
    }

    trackers.shutdown_all().await;
    tracing::info!("All nonce trackers stopped");

    Ok(())
}
