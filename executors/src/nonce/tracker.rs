use std::{future::Future, sync::Arc, time::Duration};

use alloy::primitives::{Address, B256, U256};
use tokio::{
    sync::{Mutex, MutexGuard, oneshot},
    task::JoinHandle,
};
use tracing::Instrument;
use validator_core::{chain::ChainClient, error::ChainClientError};

use crate::metrics::{self, TrackerSnapshot};

use super::{
    error::TrackerError,
    pending::PendingTx,
    store::{NonceStore, NonceStoreError},
};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How often the reconciliation loop runs
    pub check_interval: Duration,
    /// Blocks on top of the inclusion block before a transaction is final
    pub min_block_chain_depth: u64,
    /// Age after which a pending transaction without receipt is flagged
    pub stuck_interval: Duration,
    /// Upper bound for every chain call the tracker makes
    pub rpc_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            min_block_chain_depth: 5,
            stuck_interval: Duration::from_secs(600),
            rpc_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TrackerState {
    pub(crate) curr_nonce: u64,
    /// Ascending by nonce, hashes unique
    pub(crate) pending_txs: Vec<PendingTx>,
    pub(crate) curr_wei_balance: U256,
    pub(crate) txn_confirmation_attempts: u64,
    pub(crate) chain_client_unhealthy: u64,
}

pub(crate) struct TrackerInner<S, C> {
    pub(crate) wallet: Address,
    pub(crate) chain_id: u64,
    pub(crate) store: S,
    pub(crate) chain: C,
    pub(crate) config: TrackerConfig,
    pub(crate) state: Mutex<TrackerState>,
}

/// Hands out nonces for one account and keeps track of what is still in flight.
pub trait NonceTracker: Send + Sync {
    /// Runs `f` with the next nonce while holding the allocation lock.
    ///
    /// `Ok(hash)` registers the transaction as pending and advances the
    /// nonce; `Err` releases the lock and leaves the nonce free for the
    /// next caller.
    fn with_nonce<F, Fut, E>(&self, f: F) -> impl Future<Output = Result<B256, E>> + Send
    where
        F: FnOnce(u64) -> Fut + Send,
        Fut: Future<Output = Result<B256, E>> + Send,
        E: From<TrackerError> + Send;

    fn pending_count(&self) -> impl Future<Output = usize> + Send;

    /// Re-reads the pending nonce from the chain and adopts it.
    fn resync(&self) -> impl Future<Output = Result<(), TrackerError>> + Send;

    /// Stops background reconciliation. Safe to call more than once.
    fn close(&self);
}

impl<T: NonceTracker> NonceTracker for Arc<T> {
    fn with_nonce<F, Fut, E>(&self, f: F) -> impl Future<Output = Result<B256, E>> + Send
    where
        F: FnOnce(u64) -> Fut + Send,
        Fut: Future<Output = Result<B256, E>> + Send,
        E: From<TrackerError> + Send,
    {
        (**self).with_nonce(f)
    }

    fn pending_count(&self) -> impl Future<Output = usize> + Send {
        (**self).pending_count()
    }

    fn resync(&self) -> impl Future<Output = Result<(), TrackerError>> + Send {
        (**self).resync()
    }

    fn close(&self) {
        (**self).close()
    }
}

/// An allocated nonce together with the tracker lock.
///
/// Either [`register`](Self::register) or [`unlock`](Self::unlock) ends the
/// lease. Dropping it without calling either behaves like `unlock`.
pub struct NonceLease<'a, S, C> {
    tracker: &'a TrackerInner<S, C>,
    state: MutexGuard<'a, TrackerState>,
    nonce: u64,
}

impl<S: NonceStore, C: ChainClient> NonceLease<'_, S, C> {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Records `hash` as pending under this nonce and advances the counter.
    pub async fn register(mut self, hash: B256) -> Result<(), TrackerError> {
        let nonce = self.nonce;
        self.tracker
            .register_locked(&mut self.state, nonce, hash)
            .await
    }

    pub fn unlock(self) {
        tracing::debug!(
            chain_id = self.tracker.chain_id,
            wallet = %self.tracker.wallet,
            nonce = self.nonce,
            "Released nonce without registering a transaction"
        );
    }
}

/// Process-local [`NonceTracker`] for a single `(chain_id, wallet)`.
pub struct LocalTracker<S, C> {
    inner: Arc<TrackerInner<S, C>>,
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    join_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S, C> LocalTracker<S, C>
where
    S: NonceStore + 'static,
    C: ChainClient + 'static,
{
    /// Reads the pending nonce from the chain, restores persisted pending
    /// transactions and starts the reconciliation loop.
    pub async fn new(
        wallet: Address,
        store: S,
        chain_id: u64,
        chain: C,
        config: TrackerConfig,
    ) -> Result<Self, TrackerError> {
        let inner = Arc::new(TrackerInner {
            wallet,
            chain_id,
            store,
            chain,
            config,
            state: Mutex::new(TrackerState::default()),
        });

        inner.initialize().await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let span = tracing::info_span!("nonce_tracker", chain_id = chain_id, wallet = %wallet);
        let join_handle = tokio::spawn(inner.clone().run(shutdown_rx).instrument(span));

        Ok(Self {
            inner,
            shutdown_tx: std::sync::Mutex::new(Some(shutdown_tx)),
            join_handle: std::sync::Mutex::new(Some(join_handle)),
        })
    }
}

impl<S: NonceStore, C: ChainClient> LocalTracker<S, C> {
    pub fn wallet(&self) -> Address {
        self.inner.wallet
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.chain_id
    }

    /// Runs a chain call under the tracker's rpc timeout, reported as
    /// [`ChainClientError::Timeout`] when it elapses.
    pub async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, ChainClientError>>,
    ) -> Result<T, ChainClientError> {
        self.inner.bounded(operation, call).await
    }

    /// Waits for the allocation lock and returns the next nonce.
    pub async fn get_nonce(&self) -> NonceLease<'_, S, C> {
        let state = self.inner.state.lock().await;
        let nonce = state.curr_nonce;
        NonceLease {
            tracker: &self.inner,
            state,
            nonce,
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending_txs.len()
    }

    pub async fn pending_txs(&self) -> Vec<PendingTx> {
        self.inner.state.lock().await.pending_txs.clone()
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        let state = self.inner.state.lock().await;
        self.inner.snapshot_of(&state)
    }

    pub async fn resync(&self) -> Result<(), TrackerError> {
        self.inner.resync().await
    }

    /// Drops a pending transaction that will never confirm, e.g. one the
    /// submitter knows was rejected after broadcast.
    pub async fn delete_pending_tx(&self, hash: B256) -> Result<PendingTx, TrackerError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let position = state
            .pending_txs
            .iter()
            .position(|tx| tx.hash == hash)
            .ok_or(TrackerError::PendingTxNotFound { hash })?;

        inner
            .store
            .delete_pending_tx(inner.chain_id, inner.wallet, hash)
            .await?;
        let removed = state.pending_txs.remove(position);

        tracing::warn!(
            chain_id = inner.chain_id,
            wallet = %inner.wallet,
            nonce = removed.nonce,
            hash = %hash,
            "Deleted unconfirmed pending transaction"
        );
        metrics::record_unconfirmed_txn_deletion(inner.chain_id, inner.wallet);
        inner.publish(&state);
        Ok(removed)
    }

    /// Swaps the hash of a pending transaction after it was resubmitted at a
    /// higher gas price under the same nonce.
    pub async fn replace_pending_tx(
        &self,
        old_hash: B256,
        new_hash: B256,
    ) -> Result<PendingTx, TrackerError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        if state.pending_txs.iter().any(|tx| tx.hash == new_hash) {
            return Err(TrackerError::DuplicatePendingTx { hash: new_hash });
        }
        let position = state
            .pending_txs
            .iter()
            .position(|tx| tx.hash == old_hash)
            .ok_or(TrackerError::PendingTxNotFound { hash: old_hash })?;

        let replaced = match inner
            .store
            .replace_pending_tx(inner.chain_id, inner.wallet, old_hash, new_hash)
            .await
        {
            Ok(replaced) => replaced,
            // the row was never persisted, store the bumped one instead
            Err(NonceStoreError::NotFound { .. }) => {
                let replaced = state.pending_txs[position].replaced_by(new_hash);
                inner.store.insert_pending_tx(&replaced).await?;
                replaced
            }
            Err(e) => return Err(e.into()),
        };
        state.pending_txs[position] = replaced.clone();

        tracing::info!(
            chain_id = inner.chain_id,
            wallet = %inner.wallet,
            nonce = replaced.nonce,
            old_hash = %old_hash,
            new_hash = %new_hash,
            bump_price_count = replaced.bump_price_count,
            "Replaced pending transaction"
        );
        metrics::record_gas_bump(inner.chain_id, inner.wallet);
        Ok(replaced)
    }

    /// Runs one reconciliation pass over the pending list.
    pub async fn check_pending_txns(
        &self,
    ) -> Result<super::confirm::ConfirmationReport, ChainClientError> {
        self.inner.check_pending_txns().await
    }

    /// Refreshes the cached wallet balance and the chain health counter.
    pub async fn check_balance(&self) -> Result<U256, ChainClientError> {
        self.inner.check_balance().await
    }

    pub async fn is_healthy(&self) -> bool {
        self.inner.state.lock().await.chain_client_unhealthy == 0
    }

    pub fn close(&self) {
        let sender = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(sender) = sender {
            // the loop may already be gone, nothing to do then
            let _ = sender.send(());
            tracing::info!(
                chain_id = self.inner.chain_id,
                wallet = %self.inner.wallet,
                "Nonce tracker closed"
            );
        }
    }

    /// Closes the tracker and waits for the reconciliation loop to finish.
    pub async fn shutdown(&self) {
        self.close();

        let handle = self
            .join_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(
                    chain_id = self.inner.chain_id,
                    wallet = %self.inner.wallet,
                    error = %e,
                    "Nonce tracker loop ended abnormally"
                );
            }
        }
    }
}

impl<S: NonceStore, C: ChainClient> NonceTracker for LocalTracker<S, C> {
    async fn with_nonce<F, Fut, E>(&self, f: F) -> Result<B256, E>
    where
        F: FnOnce(u64) -> Fut + Send,
        Fut: Future<Output = Result<B256, E>> + Send,
        E: From<TrackerError> + Send,
    {
        let lease = self.get_nonce().await;
        match f(lease.nonce()).await {
            Ok(hash) => {
                lease.register(hash).await?;
                Ok(hash)
            }
            Err(e) => {
                lease.unlock();
                Err(e)
            }
        }
    }

    async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending_txs.len()
    }

    async fn resync(&self) -> Result<(), TrackerError> {
        self.inner.resync().await
    }

    fn close(&self) {
        LocalTracker::close(self)
    }
}

impl<S: NonceStore, C: ChainClient> TrackerInner<S, C> {
    /// Bounds a chain call by the configured rpc timeout.
    pub(crate) async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, ChainClientError>>,
    ) -> Result<T, ChainClientError> {
        match tokio::time::timeout(self.config.rpc_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ChainClientError::Timeout {
                chain_id: self.chain_id,
                operation: operation.to_string(),
                timeout_ms: self.config.rpc_timeout.as_millis() as u64,
            }),
        }
    }

    async fn initialize(&self) -> Result<(), TrackerError> {
        let chain_nonce = self
            .bounded("pending_nonce_at", self.chain.pending_nonce_at(self.wallet))
            .await
            .map_err(|source| TrackerError::Initialization {
                chain_id: self.chain_id,
                wallet: self.wallet,
                source,
            })?;

        let persisted = match self.store.list_pending_txs(self.chain_id, self.wallet).await {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::error!(
                    chain_id = self.chain_id,
                    wallet = %self.wallet,
                    error = %e,
                    "Failed to load persisted pending transactions, starting empty"
                );
                Vec::new()
            }
        };

        let (mut kept, never_accepted): (Vec<_>, Vec<_>) = persisted
            .into_iter()
            .partition(|tx| tx.nonce < chain_nonce);

        for tx in never_accepted {
            tracing::warn!(
                chain_id = self.chain_id,
                wallet = %self.wallet,
                nonce = tx.nonce,
                hash = %tx.hash,
                chain_nonce = chain_nonce,
                "Dropping persisted pending transaction unknown to the chain"
            );
            if let Err(e) = self
                .store
                .delete_pending_tx(self.chain_id, self.wallet, tx.hash)
                .await
            {
                tracing::warn!(
                    chain_id = self.chain_id,
                    wallet = %self.wallet,
                    hash = %tx.hash,
                    error = %e,
                    "Failed to delete stale pending transaction"
                );
            }
        }

        kept.sort_by_key(|tx| tx.nonce);

        let mut state = self.state.lock().await;
        state.curr_nonce = chain_nonce;
        state.pending_txs = kept;

        tracing::info!(
            chain_id = self.chain_id,
            wallet = %self.wallet,
            nonce = chain_nonce,
            pending = state.pending_txs.len(),
            "Nonce tracker initialized"
        );
        self.publish(&state);
        Ok(())
    }

    async fn register_locked(
        &self,
        state: &mut TrackerState,
        nonce: u64,
        hash: B256,
    ) -> Result<(), TrackerError> {
        if state.pending_txs.iter().any(|tx| tx.hash == hash) {
            return Err(TrackerError::DuplicatePendingTx { hash });
        }

        // only reachable after a resync moved the counter backwards
        if let Some(position) = state.pending_txs.iter().position(|tx| tx.nonce == nonce) {
            let superseded = state.pending_txs.remove(position);
            tracing::warn!(
                chain_id = self.chain_id,
                wallet = %self.wallet,
                nonce = nonce,
                old_hash = %superseded.hash,
                new_hash = %hash,
                "New transaction supersedes pending transaction with the same nonce"
            );
            if let Err(e) = self
                .store
                .delete_pending_tx(self.chain_id, self.wallet, superseded.hash)
                .await
            {
                tracing::error!(
                    chain_id = self.chain_id,
                    wallet = %self.wallet,
                    hash = %superseded.hash,
                    error = %e,
                    "Failed to delete superseded pending transaction"
                );
            }
        }

        let tx = PendingTx::new(self.chain_id, self.wallet, nonce, hash);
        if let Err(e) = self.store.insert_pending_tx(&tx).await {
            tracing::error!(
                chain_id = self.chain_id,
                wallet = %self.wallet,
                nonce = nonce,
                hash = %hash,
                error = %e,
                "Failed to persist pending transaction"
            );
        }

        let position = state.pending_txs.partition_point(|p| p.nonce < nonce);
        state.pending_txs.insert(position, tx);
        state.curr_nonce = nonce + 1;

        tracing::debug!(
            chain_id = self.chain_id,
            wallet = %self.wallet,
            nonce = nonce,
            hash = %hash,
            "Registered pending transaction"
        );
        self.publish(state);
        Ok(())
    }

    async fn resync(&self) -> Result<(), TrackerError> {
        let mut state = self.state.lock().await;
        let chain_nonce = self
            .bounded("pending_nonce_at", self.chain.pending_nonce_at(self.wallet))
            .await?;

        tracing::info!(
            chain_id = self.chain_id,
            wallet = %self.wallet,
            previous_nonce = state.curr_nonce,
            chain_nonce = chain_nonce,
            "Resynced nonce from chain"
        );
        state.curr_nonce = chain_nonce;
        self.publish(&state);
        Ok(())
    }

    pub(crate) fn snapshot_of(&self, state: &TrackerState) -> TrackerSnapshot {
        TrackerSnapshot {
            chain_id: self.chain_id,
            wallet: self.wallet,
            current_nonce: state.curr_nonce,
            pending_count: state.pending_txs.len(),
            wei_balance: state.curr_wei_balance,
            confirmation_attempts: state.txn_confirmation_attempts,
            chain_client_unhealthy: state.chain_client_unhealthy,
        }
    }

    pub(crate) fn publish(&self, state: &TrackerState) {
        metrics::record_tracker_state(&self.snapshot_of(state));
    }
}
