use alloy::primitives::Address;
use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;
use validator_core::error::{ChainClientError, RpcErrorKind};
use validator_executors::nonce::TrackerError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No nonce tracker for wallet {wallet} on chain {chain_id}")]
    TrackerNotFound { chain_id: u64, wallet: Address },

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Admin request failed");
        }

        (
            status,
            Json(json!({
                "error": {
                    "message": self.to_string(),
                }
            })),
        )
            .into_response()
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::TrackerNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Tracker(TrackerError::Chain(error))
            | ApiError::Tracker(TrackerError::Initialization { source: error, .. }) => {
                chain_status_code(error)
            }
            ApiError::Tracker(TrackerError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Tracker(TrackerError::DuplicatePendingTx { .. }) => StatusCode::CONFLICT,
            ApiError::Tracker(TrackerError::PendingTxNotFound { .. }) => StatusCode::NOT_FOUND,
        }
    }
}

fn chain_status_code(error: &ChainClientError) -> StatusCode {
    match error {
        ChainClientError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ChainClientError::NotFound { .. } => StatusCode::NOT_FOUND,
        ChainClientError::RpcConfigError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        ChainClientError::RpcError { kind, .. } => match kind {
            RpcErrorKind::TransportHttpError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RpcErrorKind::UnsupportedFeature { .. } => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::BAD_GATEWAY,
        },
    }
}
