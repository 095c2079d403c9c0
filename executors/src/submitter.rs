use std::sync::Arc;

use alloy::{
    consensus::{SignableTransaction, Signed, TxEnvelope, TypedTransaction},
    eips::eip2718::Encodable2718,
    network::{TransactionBuilder, TxSigner},
    primitives::{Address, B256, Bytes, U256},
    rpc::types::TransactionRequest as AlloyTransactionRequest,
    signers::local::PrivateKeySigner,
};
use thiserror::Error;
use validator_core::{
    chain::{ChainClient, TransactionBroadcaster},
    error::{ChainClientError, NonceErrorKind},
};

use crate::{
    nonce::{LocalTracker, NonceStore, NonceTracker, PendingTx, TrackerError},
    retry::{NonceConflict, retry_on_nonce_conflict},
};

/// Default price increase per bump, in percent of the suggested gas price.
pub const DEFAULT_BUMP_PERCENT: u64 = 10;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Chain client error: {0}")]
    Chain(#[from] ChainClientError),

    #[error("Nonce tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Failed to build transaction: {message}")]
    TransactionBuildFailed { message: String },

    #[error("Failed to sign transaction: {message}")]
    SigningError { message: String },

    #[error("Signer {signer} does not control tracked wallet {wallet}")]
    SignerMismatch { signer: Address, wallet: Address },

    #[error("Transaction {hash} was already mined in block {block_number}")]
    AlreadyMined { hash: B256, block_number: u64 },
}

impl NonceConflict for SubmitError {
    fn nonce_error_kind(&self) -> NonceErrorKind {
        match self {
            SubmitError::Chain(e) => e.nonce_error_kind(),
            SubmitError::Tracker(e) => e.nonce_error_kind(),
            _ => NonceErrorKind::Other,
        }
    }
}

/// A contract call or transfer to be sent from the tracked wallet.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
}

/// Price for the next replacement of a transaction already bumped
/// `bump_price_count` times.
pub fn bumped_gas_price(suggested: u128, bump_percent: u64, bump_price_count: u32) -> u128 {
    let multiplier = 100 + bump_percent as u128 * (bump_price_count as u128 + 1);
    suggested.saturating_mul(multiplier) / 100
}

/// Price for replacing a transaction the node may still hold at
/// `original`. Nodes reject replacements that do not raise the price of the
/// transaction they hold, so a falling market price never undercuts it.
pub fn replacement_gas_price(
    suggested: u128,
    original: Option<u128>,
    bump_percent: u64,
    bump_price_count: u32,
) -> u128 {
    let bumped = bumped_gas_price(suggested, bump_percent, bump_price_count);
    match original {
        Some(original) => {
            let floor = original
                .saturating_mul(100 + bump_percent as u128)
                .div_ceil(100);
            bumped.max(floor)
        }
        None => bumped,
    }
}

/// Signs and broadcasts legacy transactions for the wallet behind a
/// [`LocalTracker`], recovering once from nonce conflicts.
pub struct EoaSubmitter<S, C> {
    tracker: Arc<LocalTracker<S, C>>,
    chain: C,
    signer: PrivateKeySigner,
    bump_percent: u64,
}

impl<S, C> EoaSubmitter<S, C>
where
    S: NonceStore,
    C: TransactionBroadcaster,
{
    pub fn new(
        tracker: Arc<LocalTracker<S, C>>,
        chain: C,
        signer: PrivateKeySigner,
    ) -> Result<Self, SubmitError> {
        if signer.address() != tracker.wallet() {
            return Err(SubmitError::SignerMismatch {
                signer: signer.address(),
                wallet: tracker.wallet(),
            });
        }

        Ok(Self {
            tracker,
            chain,
            signer,
            bump_percent: DEFAULT_BUMP_PERCENT,
        })
    }

    pub fn with_bump_percent(mut self, bump_percent: u64) -> Self {
        self.bump_percent = bump_percent;
        self
    }

    pub fn tracker(&self) -> &Arc<LocalTracker<S, C>> {
        &self.tracker
    }

    /// Sends `request` and returns the transaction hash once it is tracked
    /// as pending.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<B256, SubmitError> {
        retry_on_nonce_conflict(self.tracker.as_ref(), move || self.submit_once(request)).await
    }

    async fn submit_once(&self, request: &SubmitRequest) -> Result<B256, SubmitError> {
        // read outside the nonce lock
        let gas_price = self
            .tracker
            .bounded("suggest_gas_price", self.chain.suggest_gas_price())
            .await?;

        self.tracker
            .with_nonce(|nonce| async move {
                let (expected_hash, raw) = self.sign(request, nonce, gas_price).await?;
                let hash = self
                    .tracker
                    .bounded("send_raw_transaction", self.chain.send_raw_transaction(raw))
                    .await?;

                if hash != expected_hash {
                    tracing::warn!(
                        nonce = nonce,
                        expected = %expected_hash,
                        returned = %hash,
                        "Node returned a different transaction hash than signed"
                    );
                }
                tracing::debug!(nonce = nonce, hash = %hash, gas_price = gas_price, "Transaction sent");
                Ok::<_, SubmitError>(hash)
            })
            .await
    }

    /// Resubmits `pending` under the same nonce at a higher gas price and
    /// tracks the replacement instead of the original.
    pub async fn bump_gas(
        &self,
        pending: &PendingTx,
        request: &SubmitRequest,
    ) -> Result<PendingTx, SubmitError> {
        let in_mempool = match self
            .tracker
            .bounded("transaction_by_hash", self.chain.transaction_by_hash(pending.hash))
            .await
        {
            Ok(transaction) => {
                if let Some(block_number) = transaction.block_number {
                    return Err(SubmitError::AlreadyMined {
                        hash: pending.hash,
                        block_number,
                    });
                }
                Some(transaction.gas_price)
            }
            // dropped from the mempool, a replacement is exactly what is needed
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let suggested = self
            .tracker
            .bounded("suggest_gas_price", self.chain.suggest_gas_price())
            .await?;
        let gas_price = replacement_gas_price(
            suggested,
            in_mempool,
            self.bump_percent,
            pending.bump_price_count,
        );

        let (_, raw) = self.sign(request, pending.nonce, gas_price).await?;
        let new_hash = self
            .tracker
            .bounded("send_raw_transaction", self.chain.send_raw_transaction(raw))
            .await?;
        let replaced = self
            .tracker
            .replace_pending_tx(pending.hash, new_hash)
            .await?;

        tracing::info!(
            chain_id = self.chain.chain_id(),
            nonce = pending.nonce,
            old_hash = %pending.hash,
            new_hash = %new_hash,
            gas_price = gas_price,
            "Bumped gas price of pending transaction"
        );
        Ok(replaced)
    }

    async fn sign(
        &self,
        request: &SubmitRequest,
        nonce: u64,
        gas_price: u128,
    ) -> Result<(B256, Bytes), SubmitError> {
        let mut typed_tx: TypedTransaction = AlloyTransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(request.to)
            .with_value(request.value)
            .with_input(request.input.clone())
            .with_chain_id(self.chain.chain_id())
            .with_nonce(nonce)
            .with_gas_limit(request.gas_limit)
            .with_gas_price(gas_price)
            .build_typed_tx()
            .map_err(|e| SubmitError::TransactionBuildFailed {
                message: format!("Failed to build typed transaction: {e:?}"),
            })?;

        let signature = self
            .signer
            .sign_transaction(&mut typed_tx)
            .await
            .map_err(|e| SubmitError::SigningError {
                message: e.to_string(),
            })?;

        let signed: Signed<TypedTransaction> = typed_tx.into_signed(signature);
        let hash = *signed.hash();
        let envelope = TxEnvelope::from(signed);
        Ok((hash, envelope.encoded_2718().into()))
    }
}
