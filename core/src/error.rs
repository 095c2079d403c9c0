use alloy::transports::{RpcError as AlloyRpcError, TransportErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    /// Server returned an error response.
    #[error("server returned an error response: {}", .0.as_display())]
    ErrorResp(RpcErrorResponse),

    /// Server returned a null response when a non-null response was expected.
    #[error("server returned a null response when a non-null response was expected")]
    NullResp,

    /// Rpc server returned an unsupported feature.
    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// Returned when a local pre-processing step fails.
    #[error("local usage error: {message}")]
    InternalError { message: String },

    /// JSON serialization error.
    #[error("serialization error: {message}")]
    SerError { message: String },

    /// JSON deserialization error.
    #[error("deserialization error: {message}, text: {text}")]
    DeserError { message: String, text: String },

    #[error("HTTP error {status}")]
    TransportHttpError { status: u16, body: String },

    #[error("Other transport error: {message}")]
    OtherTransportError { message: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RpcErrorResponse {
    /// The error code.
    pub code: i64,
    /// The error message (if any).
    pub message: String,
    /// The error data (if any).
    pub data: Option<String>,
}

impl RpcErrorResponse {
    pub fn as_display(&self) -> String {
        format!(
            "code {}: {}{}",
            self.code,
            self.message,
            self.data
                .as_ref()
                .map(|data| format!(", data: {data}"))
                .unwrap_or_default()
        )
    }
}

/// Errors surfaced by a [`ChainClient`](crate::chain::ChainClient) implementation.
#[derive(Debug, Error, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainClientError {
    /// The requested object (receipt, transaction, block) is unknown to the node.
    #[error("{what} not found on chain {chain_id}")]
    NotFound { chain_id: u64, what: String },

    #[error("RPC error on chain {chain_id} at {rpc_url}: {message}")]
    RpcError {
        chain_id: u64,
        rpc_url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[error("RPC call `{operation}` on chain {chain_id} timed out after {timeout_ms}ms")]
    Timeout {
        chain_id: u64,
        operation: String,
        timeout_ms: u64,
    },

    #[error("Bad RPC configuration: {message}")]
    RpcConfigError { message: String },
}

impl ChainClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChainClientError::NotFound { .. })
    }

    /// Classify this error for the nonce-conflict retry policy.
    ///
    /// Only JSON-RPC error responses can carry a nonce conflict; transport
    /// failures, timeouts and missing objects are always [`NonceErrorKind::Other`].
    pub fn nonce_error_kind(&self) -> NonceErrorKind {
        match self {
            ChainClientError::RpcError {
                kind: RpcErrorKind::ErrorResp(response),
                ..
            } => classify_nonce_error(&response.message),
            _ => NonceErrorKind::Other,
        }
    }
}

/// Provider-independent view of nonce related send failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NonceErrorKind {
    /// The chain already has a transaction at (or beyond) this nonce.
    NonceTooLow,
    /// The node rejected the nonce for any other reason (gap, reuse, ...).
    NonceConflict,
    Other,
}

impl NonceErrorKind {
    pub fn is_nonce_conflict(&self) -> bool {
        matches!(self, NonceErrorKind::NonceTooLow | NonceErrorKind::NonceConflict)
    }
}

/// Maps provider specific error wording to a [`NonceErrorKind`].
pub fn classify_nonce_error(message: &str) -> NonceErrorKind {
    let msg_lower = message.to_lowercase();

    if msg_lower.contains("nonce too low") {
        NonceErrorKind::NonceTooLow
    } else if msg_lower.contains("invalid transaction nonce") {
        NonceErrorKind::NonceConflict
    } else {
        NonceErrorKind::Other
    }
}

fn to_rpc_error_kind(err: &AlloyRpcError<TransportErrorKind>) -> RpcErrorKind {
    match err {
        AlloyRpcError::ErrorResp(err) => RpcErrorKind::ErrorResp(RpcErrorResponse {
            code: err.code,
            message: err.message.to_string(),
            data: err.data.as_ref().map(|data| data.to_string()),
        }),
        AlloyRpcError::NullResp => RpcErrorKind::NullResp,
        AlloyRpcError::UnsupportedFeature(feature) => RpcErrorKind::UnsupportedFeature {
            message: feature.to_string(),
        },
        AlloyRpcError::LocalUsageError(err) => RpcErrorKind::InternalError {
            message: err.to_string(),
        },
        AlloyRpcError::SerError(err) => RpcErrorKind::SerError {
            message: err.to_string(),
        },
        AlloyRpcError::DeserError { err, text } => RpcErrorKind::DeserError {
            message: err.to_string(),
            text: text.to_string(),
        },
        AlloyRpcError::Transport(err) => match err {
            TransportErrorKind::HttpError(err) => RpcErrorKind::TransportHttpError {
                status: err.status,
                body: err.body.to_string(),
            },
            _ => RpcErrorKind::OtherTransportError {
                message: err.to_string(),
            },
        },
    }
}

pub trait AlloyRpcErrorToChainError {
    fn to_chain_error(&self, chain_id: u64, rpc_url: &str) -> ChainClientError;
}

impl AlloyRpcErrorToChainError for AlloyRpcError<TransportErrorKind> {
    fn to_chain_error(&self, chain_id: u64, rpc_url: &str) -> ChainClientError {
        ChainClientError::RpcError {
            chain_id,
            rpc_url: rpc_url.to_string(),
            message: self.to_string(),
            kind: to_rpc_error_kind(self),
        }
    }
}
