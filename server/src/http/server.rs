use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::{sync::watch, task::JoinHandle};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use validator_core::chain::ChainClient;
use validator_executors::{LocalTracker, TrackerRegistry, nonce::NonceStore};

use super::routes::{
    admin::{metrics::get_metrics, nonce_trackers},
    health::health,
};

pub struct ValidatorServerState<S, C> {
    pub trackers: Arc<TrackerRegistry<LocalTracker<S, C>>>,
    pub metrics_registry: Arc<prometheus::Registry>,
}

impl<S, C> Clone for ValidatorServerState<S, C> {
    fn clone(&self) -> Self {
        Self {
            trackers: self.trackers.clone(),
            metrics_registry: self.metrics_registry.clone(),
        }
    }
}

pub struct ValidatorServer {
    handle: Option<JoinHandle<Result<(), std::io::Error>>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    app: Router,
}

/// Operator-facing routes: health, metrics and nonce tracker administration.
pub fn router<S, C>(state: ValidatorServerState<S, C>) -> Router
where
    S: NonceStore + 'static,
    C: ChainClient + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/health", get(health::<S, C>))
        .route("/metrics", get(get_metrics::<S, C>))
        .route(
            "/admin/nonce-trackers/{chain_id}/{wallet}/pending",
            get(nonce_trackers::list_pending::<S, C>),
        )
        .route(
            "/admin/nonce-trackers/{chain_id}/{wallet}/resync",
            post(nonce_trackers::resync::<S, C>),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl ValidatorServer {
    pub fn new<S, C>(state: ValidatorServerState<S, C>) -> Self
    where
        S: NonceStore + 'static,
        C: ChainClient + 'static,
    {
        Self {
            handle: None,
            shutdown_tx: None,
            app: router(state),
        }
    }

    pub fn start(&mut self, listener: tokio::net::TcpListener) -> Result<(), std::io::Error> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = self.app.clone();
        let local_addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            tracing::info!("HTTP server starting on {}", local_addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let mut rx = shutdown_rx;
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                    tracing::info!("HTTP server shutting down");
                })
                .await
        });

        self.handle = Some(handle);
        self.shutdown_tx = Some(shutdown_tx);

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), std::io::Error> {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(true).is_err() {
                tracing::error!("Failed to send shutdown signal to HTTP server");
            }
        }

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(result) => {
                    if let Err(e) = result {
                        tracing::error!("HTTP server error during shutdown: {}", e);
                        return Err(e);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to join HTTP server task: {}", e);
                    return Err(std::io::Error::other(format!("Task join error: {e}")));
                }
            }
        }

        Ok(())
    }
}
