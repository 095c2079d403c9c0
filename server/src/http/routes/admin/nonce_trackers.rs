use alloy::primitives::Address;
use axum::{
    Json,
    extract::{Path, State},
};
use validator_core::chain::ChainClient;
use validator_executors::{
    LocalTracker,
    metrics::TrackerSnapshot,
    nonce::{NonceStore, PendingTx},
};

use std::sync::Arc;

use crate::http::{error::ApiError, server::ValidatorServerState};

fn tracker<S, C>(
    state: &ValidatorServerState<S, C>,
    chain_id: u64,
    wallet: Address,
) -> Result<Arc<LocalTracker<S, C>>, ApiError> {
    state
        .trackers
        .get(chain_id, wallet)
        .ok_or(ApiError::TrackerNotFound { chain_id, wallet })
}

/// Pending transactions of one tracker, lowest nonce first
pub async fn list_pending<S, C>(
    State(state): State<ValidatorServerState<S, C>>,
    Path((chain_id, wallet)): Path<(u64, Address)>,
) -> Result<Json<Vec<PendingTx>>, ApiError>
where
    S: NonceStore + 'static,
    C: ChainClient + 'static,
{
    let tracker = tracker(&state, chain_id, wallet)?;
    Ok(Json(tracker.pending_txs().await))
}

/// Re-reads the pending nonce from the chain and returns the new state
pub async fn resync<S, C>(
    State(state): State<ValidatorServerState<S, C>>,
    Path((chain_id, wallet)): Path<(u64, Address)>,
) -> Result<Json<TrackerSnapshot>, ApiError>
where
    S: NonceStore + 'static,
    C: ChainClient + 'static,
{
    let tracker = tracker(&state, chain_id, wallet)?;
    tracker.resync().await?;

    tracing::info!(chain_id = chain_id, wallet = %wallet, "Resync requested through admin API");
    Ok(Json(tracker.snapshot().await))
}
