use std::{sync::Arc, time::Duration};

use alloy::primitives::{B256, U256};
use chrono::Utc;
use tokio::{
    sync::oneshot,
    time::{Instant, MissedTickBehavior},
};
use validator_core::{
    chain::{ChainClient, HeaderInfo, ReceiptInfo},
    error::ChainClientError,
};

use crate::metrics;

use super::{error::ConfirmationError, pending::PendingTx, store::NonceStore, tracker::TrackerInner};

/// Pending transaction that stopped a reconciliation pass.
#[derive(Debug)]
pub struct HaltedCheck {
    pub nonce: u64,
    pub hash: B256,
    pub error: ConfirmationError,
}

/// Outcome of one pass over the pending list.
#[derive(Debug, Default)]
pub struct ConfirmationReport {
    /// Transactions confirmed at the required depth and removed
    pub confirmed: Vec<PendingTx>,
    /// First entry that could not be resolved; later entries were not checked
    pub halted: Option<HaltedCheck>,
}

impl<S: NonceStore, C: ChainClient> TrackerInner<S, C> {
    pub(crate) async fn run(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) {
        // interval_at panics on a zero period
        let period = self.config.check_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(check_interval_ms = period.as_millis() as u64, "Reconciliation loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::info!("Reconciliation loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        match self.check_pending_txns().await {
            Ok(report) => {
                if !report.confirmed.is_empty() {
                    tracing::debug!(confirmed = report.confirmed.len(), "Reconciliation pass done");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to check pending transactions");
            }
        }

        if let Err(e) = self.check_balance().await {
            tracing::error!(error = %e, "Failed to check wallet balance");
        }
    }

    pub(crate) async fn check_pending_txns(&self) -> Result<ConfirmationReport, ChainClientError> {
        let head = self.bounded("head_header", self.chain.head_header()).await?;
        // copy so allocators are not blocked by the receipt lookups below
        let pending = self.state.lock().await.pending_txs.clone();

        let mut report = ConfirmationReport::default();
        for tx in pending {
            match self.check_if_pending_tx_was_included(&tx, &head).await {
                Ok(()) => report.confirmed.push(tx),
                Err(error) => {
                    match &error {
                        ConfirmationError::BlockDiffNotEnough { .. }
                        | ConfirmationError::ReceiptNotFound { .. } => {
                            tracing::debug!(nonce = tx.nonce, hash = %tx.hash, reason = %error, "Pending transaction not final yet");
                        }
                        ConfirmationError::PendingTxMayBeStuck { .. } => {
                            tracing::warn!(nonce = tx.nonce, hash = %tx.hash, reason = %error, "Pending transaction may be stuck");
                        }
                        ConfirmationError::Rpc { .. } => {
                            tracing::error!(nonce = tx.nonce, hash = %tx.hash, error = %error, "Receipt lookup failed");
                        }
                    }
                    report.halted = Some(HaltedCheck {
                        nonce: tx.nonce,
                        hash: tx.hash,
                        error,
                    });
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn check_if_pending_tx_was_included(
        &self,
        tx: &PendingTx,
        head: &HeaderInfo,
    ) -> Result<(), ConfirmationError> {
        let receipt = match self.find_receipt(tx).await {
            Ok(receipt) => receipt,
            Err(error) => {
                let age = tx.age(Utc::now()).to_std().unwrap_or_default();
                if age > self.config.stuck_interval {
                    let mut state = self.state.lock().await;
                    state.txn_confirmation_attempts += 1;
                    self.publish(&state);
                    metrics::record_stuck_transaction(self.chain_id, self.wallet, age.as_secs_f64());
                    return Err(ConfirmationError::PendingTxMayBeStuck {
                        hash: tx.hash,
                        nonce: tx.nonce,
                        age,
                    });
                }
                if error.is_not_found() {
                    return Err(ConfirmationError::ReceiptNotFound { hash: tx.hash });
                }
                return Err(ConfirmationError::Rpc {
                    hash: tx.hash,
                    error,
                });
            }
        };

        self.state.lock().await.txn_confirmation_attempts = 0;

        let block_diff = head.number.saturating_sub(receipt.block_number);
        if block_diff < self.config.min_block_chain_depth {
            return Err(ConfirmationError::BlockDiffNotEnough {
                hash: tx.hash,
                block_number: receipt.block_number,
                block_diff,
                required: self.config.min_block_chain_depth,
            });
        }

        if let Err(e) = self
            .store
            .delete_pending_tx(self.chain_id, self.wallet, tx.hash)
            .await
        {
            tracing::error!(
                nonce = tx.nonce,
                hash = %tx.hash,
                error = %e,
                "Failed to delete confirmed transaction from store"
            );
        }

        let mut state = self.state.lock().await;
        state.pending_txs.retain(|pending| pending.hash != tx.hash);
        self.publish(&state);
        drop(state);

        let latency = tx.age(Utc::now()).to_std().unwrap_or_default();
        metrics::record_transaction_confirmed(self.chain_id, self.wallet, latency.as_secs_f64());

        if receipt.status {
            tracing::info!(
                nonce = tx.nonce,
                hash = %tx.hash,
                block_number = receipt.block_number,
                block_diff = block_diff,
                "Pending transaction confirmed"
            );
        } else {
            tracing::warn!(
                nonce = tx.nonce,
                hash = %tx.hash,
                block_number = receipt.block_number,
                "Pending transaction confirmed but reverted"
            );
        }
        Ok(())
    }

    /// Receipt for the latest hash of `tx`, falling back to the hashes it was
    /// broadcast under before a gas bump.
    async fn find_receipt(&self, tx: &PendingTx) -> Result<ReceiptInfo, ChainClientError> {
        let error = match self
            .bounded("transaction_receipt", self.chain.transaction_receipt(tx.hash))
            .await
        {
            Err(error) if error.is_not_found() => error,
            latest => return latest,
        };

        for replaced in tx.replaced_hashes.iter().rev() {
            match self
                .bounded("transaction_receipt", self.chain.transaction_receipt(*replaced))
                .await
            {
                Ok(receipt) => {
                    tracing::info!(
                        nonce = tx.nonce,
                        hash = %tx.hash,
                        mined_hash = %replaced,
                        "Transaction was mined under a hash it had before a gas bump"
                    );
                    return Ok(receipt);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Err(error)
    }

    pub(crate) async fn check_balance(&self) -> Result<U256, ChainClientError> {
        let result = self
            .bounded("balance_at", self.chain.balance_at(self.wallet))
            .await;

        let mut state = self.state.lock().await;
        match &result {
            Ok(balance) => {
                state.curr_wei_balance = *balance;
                state.chain_client_unhealthy = 0;
            }
            Err(_) => {
                state.chain_client_unhealthy += 1;
            }
        }
        self.publish(&state);
        result
    }
}
