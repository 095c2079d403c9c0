use std::{fmt::Display, future::Future};

use validator_core::error::{ChainClientError, NonceErrorKind};

use crate::nonce::{NonceTracker, TrackerError};

/// Errors that can tell whether the chain rejected a transaction because of
/// its nonce.
pub trait NonceConflict {
    fn nonce_error_kind(&self) -> NonceErrorKind;
}

impl NonceConflict for ChainClientError {
    fn nonce_error_kind(&self) -> NonceErrorKind {
        ChainClientError::nonce_error_kind(self)
    }
}

impl NonceConflict for TrackerError {
    fn nonce_error_kind(&self) -> NonceErrorKind {
        match self {
            TrackerError::Chain(e) => e.nonce_error_kind(),
            _ => NonceErrorKind::Other,
        }
    }
}

/// Runs `f`, and if it fails with a nonce conflict, resyncs the tracker and
/// runs it exactly once more.
///
/// Any other error, a failed resync, or a second failure is returned as is.
pub async fn retry_on_nonce_conflict<T, F, Fut, R, E>(tracker: &T, mut f: F) -> Result<R, E>
where
    T: NonceTracker,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: NonceConflict + Display,
{
    let error = match f().await {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };

    let kind = error.nonce_error_kind();
    if !kind.is_nonce_conflict() {
        return Err(error);
    }

    tracing::warn!(
        kind = ?kind,
        error = %error,
        "Nonce conflict reported by chain, resyncing and retrying once"
    );

    if let Err(resync_error) = tracker.resync().await {
        tracing::error!(
            error = %resync_error,
            original_error = %error,
            "Resync after nonce conflict failed"
        );
        return Err(error);
    }

    f().await
}

#[cfg(test)]
mod tests {
    use validator_core::error::{RpcErrorKind, RpcErrorResponse};

    use super::*;

    fn rpc_error(message: &str) -> ChainClientError {
        ChainClientError::RpcError {
            chain_id: 1,
            rpc_url: "http://localhost:8545/".to_string(),
            message: message.to_string(),
            kind: RpcErrorKind::ErrorResp(RpcErrorResponse {
                code: -32000,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    #[test]
    fn test_tracker_error_delegates_to_chain_error() {
        let err = TrackerError::Chain(rpc_error("nonce too low: next nonce 5, tx nonce 3"));
        assert_eq!(err.nonce_error_kind(), NonceErrorKind::NonceTooLow);

        let err = TrackerError::PendingTxNotFound {
            hash: Default::default(),
        };
        assert_eq!(err.nonce_error_kind(), NonceErrorKind::Other);
    }

    #[test]
    fn test_timeout_is_never_a_conflict() {
        let err = ChainClientError::Timeout {
            chain_id: 1,
            operation: "send_raw_transaction".to_string(),
            timeout_ms: 15_000,
        };
        assert!(!NonceConflict::nonce_error_kind(&err).is_nonce_conflict());
    }
}
