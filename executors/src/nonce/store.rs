use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

use alloy::primitives::{Address, B256};
use thiserror::Error;

use super::pending::PendingTx;

#[derive(Debug, Error)]
pub enum NonceStoreError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Pending transaction {hash} not found for {address} on chain {chain_id}")]
    NotFound {
        chain_id: u64,
        address: Address,
        hash: B256,
    },

    #[error("Pending transaction {hash} already stored for {address} on chain {chain_id}")]
    Duplicate {
        chain_id: u64,
        address: Address,
        hash: B256,
    },
}

/// Durable cache of in-flight transactions, scoped by chain id and address.
///
/// Rows are keyed by `(chain_id, address, hash)`. The next nonce is never
/// stored here; it is always derived from the chain.
pub trait NonceStore: Send + Sync {
    /// All pending transactions for the account, lowest nonce first.
    fn list_pending_txs(
        &self,
        chain_id: u64,
        address: Address,
    ) -> impl Future<Output = Result<Vec<PendingTx>, NonceStoreError>> + Send;

    fn insert_pending_tx(
        &self,
        tx: &PendingTx,
    ) -> impl Future<Output = Result<(), NonceStoreError>> + Send;

    fn delete_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        hash: B256,
    ) -> impl Future<Output = Result<(), NonceStoreError>> + Send;

    /// Swap the hash of a pending row, keeping its nonce and bumping its
    /// price counter. Returns the updated row.
    fn replace_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        old_hash: B256,
        new_hash: B256,
    ) -> impl Future<Output = Result<PendingTx, NonceStoreError>> + Send;
}

impl<S: NonceStore> NonceStore for Arc<S> {
    fn list_pending_txs(
        &self,
        chain_id: u64,
        address: Address,
    ) -> impl Future<Output = Result<Vec<PendingTx>, NonceStoreError>> + Send {
        (**self).list_pending_txs(chain_id, address)
    }

    fn insert_pending_tx(
        &self,
        tx: &PendingTx,
    ) -> impl Future<Output = Result<(), NonceStoreError>> + Send {
        (**self).insert_pending_tx(tx)
    }

    fn delete_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        hash: B256,
    ) -> impl Future<Output = Result<(), NonceStoreError>> + Send {
        (**self).delete_pending_tx(chain_id, address, hash)
    }

    fn replace_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        old_hash: B256,
        new_hash: B256,
    ) -> impl Future<Output = Result<PendingTx, NonceStoreError>> + Send {
        (**self).replace_pending_tx(chain_id, address, old_hash, new_hash)
    }
}

/// Process-local store for development setups and tests.
#[derive(Debug, Default)]
pub struct InMemoryNonceStore {
    accounts: Mutex<HashMap<(u64, Address), Vec<PendingTx>>>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_account<R>(
        &self,
        chain_id: u64,
        address: Address,
        f: impl FnOnce(&mut Vec<PendingTx>) -> R,
    ) -> R {
        let mut accounts = self
            .accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(accounts.entry((chain_id, address)).or_default())
    }
}

impl NonceStore for InMemoryNonceStore {
    async fn list_pending_txs(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<Vec<PendingTx>, NonceStoreError> {
        Ok(self.with_account(chain_id, address, |txs| {
            let mut txs = txs.clone();
            txs.sort_by_key(|tx| tx.nonce);
            txs
        }))
    }

    async fn insert_pending_tx(&self, tx: &PendingTx) -> Result<(), NonceStoreError> {
        self.with_account(tx.chain_id, tx.address, |txs| {
            if txs.iter().any(|existing| existing.hash == tx.hash) {
                return Err(NonceStoreError::Duplicate {
                    chain_id: tx.chain_id,
                    address: tx.address,
                    hash: tx.hash,
                });
            }
            txs.push(tx.clone());
            Ok(())
        })
    }

    async fn delete_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        hash: B256,
    ) -> Result<(), NonceStoreError> {
        self.with_account(chain_id, address, |txs| {
            txs.retain(|tx| tx.hash != hash);
        });
        Ok(())
    }

    async fn replace_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        old_hash: B256,
        new_hash: B256,
    ) -> Result<PendingTx, NonceStoreError> {
        self.with_account(chain_id, address, |txs| {
            if txs.iter().any(|tx| tx.hash == new_hash) {
                return Err(NonceStoreError::Duplicate {
                    chain_id,
                    address,
                    hash: new_hash,
                });
            }

            let entry = txs
                .iter_mut()
                .find(|tx| tx.hash == old_hash)
                .ok_or(NonceStoreError::NotFound {
                    chain_id,
                    address,
                    hash: old_hash,
                })?;

            *entry = entry.replaced_by(new_hash);
            Ok(entry.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(nonce: u64, hash: u8) -> PendingTx {
        PendingTx::new(1, Address::ZERO, nonce, B256::with_last_byte(hash))
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_scoped() {
        let store = InMemoryNonceStore::new();
        store.insert_pending_tx(&tx(9, 1)).await.unwrap();
        store.insert_pending_tx(&tx(7, 2)).await.unwrap();
        store.insert_pending_tx(&tx(8, 3)).await.unwrap();

        let other_chain = PendingTx::new(2, Address::ZERO, 1, B256::with_last_byte(4));
        store.insert_pending_tx(&other_chain).await.unwrap();

        let listed = store.list_pending_txs(1, Address::ZERO).await.unwrap();
        let nonces: Vec<u64> = listed.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![7, 8, 9]);

        let listed = store.list_pending_txs(2, Address::ZERO).await.unwrap();
        assert_eq!(listed, vec![other_chain]);
    }

    #[tokio::test]
    async fn test_duplicate_hash_rejected() {
        let store = InMemoryNonceStore::new();
        store.insert_pending_tx(&tx(1, 1)).await.unwrap();

        let result = store.insert_pending_tx(&tx(2, 1)).await;
        assert!(matches!(result, Err(NonceStoreError::Duplicate { .. })));
    }

    #[tokio::test]
    async fn test_replace_and_delete() {
        let store = InMemoryNonceStore::new();
        store.insert_pending_tx(&tx(4, 1)).await.unwrap();

        let replaced = store
            .replace_pending_tx(1, Address::ZERO, B256::with_last_byte(1), B256::with_last_byte(2))
            .await
            .unwrap();
        assert_eq!(replaced.nonce, 4);
        assert_eq!(replaced.bump_price_count, 1);

        let missing = store
            .replace_pending_tx(1, Address::ZERO, B256::with_last_byte(1), B256::with_last_byte(3))
            .await;
        assert!(matches!(missing, Err(NonceStoreError::NotFound { .. })));

        store
            .delete_pending_tx(1, Address::ZERO, B256::with_last_byte(2))
            .await
            .unwrap();
        assert!(store.list_pending_txs(1, Address::ZERO).await.unwrap().is_empty());
    }
}
