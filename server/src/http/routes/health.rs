use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use futures::future::join_all;
use serde_json::json;
use validator_core::chain::ChainClient;
use validator_executors::nonce::NonceStore;

use crate::http::server::ValidatorServerState;

/// 200 while every tracker's chain client answers, 503 otherwise.
pub async fn health<S, C>(State(state): State<ValidatorServerState<S, C>>) -> impl IntoResponse
where
    S: NonceStore + 'static,
    C: ChainClient + 'static,
{
    let snapshots = join_all(state.trackers.iter().map(|(_, tracker)| tracker.snapshot())).await;
    let healthy = snapshots
        .iter()
        .all(|snapshot| snapshot.chain_client_unhealthy == 0);

    let (status, label) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(json!({
            "status": label,
            "trackers": snapshots,
        })),
    )
}
