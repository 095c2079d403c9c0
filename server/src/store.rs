use std::sync::Arc;

use alloy::primitives::{Address, B256};
use redis::aio::ConnectionManager;
use validator_executors::nonce::{
    InMemoryNonceStore, NonceStore, NonceStoreError, PendingTx, RedisNonceStore,
};

use crate::config::{NonceStoreBackendKind, ValidatorConfig};

/// Nonce store selected by configuration.
#[derive(Clone)]
pub enum NonceStoreBackend {
    Redis(RedisNonceStore),
    Memory(Arc<InMemoryNonceStore>),
}

impl NonceStoreBackend {
    pub async fn from_config(config: &ValidatorConfig) -> anyhow::Result<Self> {
        match config.nonce_store.backend {
            NonceStoreBackendKind::Redis => {
                let client = redis::Client::open(config.redis.url.as_str())?;
                let connection = ConnectionManager::new(client).await?;
                tracing::info!(
                    namespace = ?config.nonce_store.namespace,
                    "Using Redis nonce store"
                );
                Ok(Self::Redis(RedisNonceStore::new(
                    connection,
                    config.nonce_store.namespace.clone(),
                )))
            }
            NonceStoreBackendKind::Memory => {
                tracing::warn!("Using in-memory nonce store, pending transactions are lost on restart");
                Ok(Self::Memory(Arc::new(InMemoryNonceStore::new())))
            }
        }
    }
}

impl NonceStore for NonceStoreBackend {
    async fn list_pending_txs(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<Vec<PendingTx>, NonceStoreError> {
        match self {
            Self::Redis(store) => store.list_pending_txs(chain_id, address).await,
            Self::Memory(store) => store.list_pending_txs(chain_id, address).await,
        }
    }

    async fn insert_pending_tx(&self, tx: &PendingTx) -> Result<(), NonceStoreError> {
        match self {
            Self::Redis(store) => store.insert_pending_tx(tx).await,
            Self::Memory(store) => store.insert_pending_tx(tx).await,
        }
    }

    async fn delete_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        hash: B256,
    ) -> Result<(), NonceStoreError> {
        match self {
            Self::Redis(store) => store.delete_pending_tx(chain_id, address, hash).await,
            Self::Memory(store) => store.delete_pending_tx(chain_id, address, hash).await,
        }
    }

    async fn replace_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        old_hash: B256,
        new_hash: B256,
    ) -> Result<PendingTx, NonceStoreError> {
        match self {
            Self::Redis(store) => {
                store
                    .replace_pending_tx(chain_id, address, old_hash, new_hash)
                    .await
            }
            Self::Memory(store) => {
                store
                    .replace_pending_tx(chain_id, address, old_hash, new_hash)
                    .await
            }
        }
    }
}
