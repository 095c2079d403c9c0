use std::time::Duration;

use alloy::primitives::{Address, B256};
use thiserror::Error;
use validator_core::error::ChainClientError;

use super::store::NonceStoreError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Failed to initialize nonce tracker for {wallet} on chain {chain_id}: {source}")]
    Initialization {
        chain_id: u64,
        wallet: Address,
        source: ChainClientError,
    },

    #[error("Chain client error: {0}")]
    Chain(#[from] ChainClientError),

    #[error("Nonce store error: {0}")]
    Store(#[from] NonceStoreError),

    #[error("Transaction {hash} is already tracked as pending")]
    DuplicatePendingTx { hash: B256 },

    #[error("No pending transaction with hash {hash}")]
    PendingTxNotFound { hash: B256 },
}

/// Outcome of checking a single pending transaction that did not resolve.
///
/// None of these are failures of the tracker: each one stops the current
/// reconciliation tick and the entry is looked at again on the next one.
#[derive(Debug, Error)]
pub enum ConfirmationError {
    #[error(
        "Transaction {hash} included in block {block_number} is {block_diff} blocks deep, {required} required"
    )]
    BlockDiffNotEnough {
        hash: B256,
        block_number: u64,
        block_diff: u64,
        required: u64,
    },

    #[error("Pending transaction {hash} with nonce {nonce} may be stuck, pending for {age:?}")]
    PendingTxMayBeStuck {
        hash: B256,
        nonce: u64,
        age: Duration,
    },

    #[error("Receipt not found for {hash}")]
    ReceiptNotFound { hash: B256 },

    #[error("Receipt lookup for {hash} failed: {error}")]
    Rpc { hash: B256, error: ChainClientError },
}
