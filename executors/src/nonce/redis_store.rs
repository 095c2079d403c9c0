use alloy::primitives::{Address, B256};
use redis::{AsyncCommands, aio::ConnectionManager};

use super::{
    pending::PendingTx,
    store::{NonceStore, NonceStoreError},
};

/// Redis backed [`NonceStore`].
///
/// Per account, pending transactions live in two keys:
/// - a sorted set of hashes scored by nonce, for ordered listing
/// - a hash of `hash -> PendingTx JSON` holding the row data
///
/// Both keys are always mutated together in an atomic pipeline.
#[derive(Clone)]
pub struct RedisNonceStore {
    redis: ConnectionManager,
    namespace: Option<String>,
}

impl RedisNonceStore {
    pub fn new(redis: ConnectionManager, namespace: Option<String>) -> Self {
        Self { redis, namespace }
    }

    pub fn pending_zset_key(&self, chain_id: u64, address: Address) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:nonce_tracker:pending:{chain_id}:{address}"),
            None => format!("nonce_tracker:pending:{chain_id}:{address}"),
        }
    }

    pub fn pending_data_key(&self, chain_id: u64, address: Address) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:nonce_tracker:pending_data:{chain_id}:{address}"),
            None => format!("nonce_tracker:pending_data:{chain_id}:{address}"),
        }
    }

    async fn get_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        hash: B256,
    ) -> Result<Option<PendingTx>, NonceStoreError> {
        let mut conn = self.redis.clone();
        let json: Option<String> = conn
            .hget(self.pending_data_key(chain_id, address), hash.to_string())
            .await?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

impl NonceStore for RedisNonceStore {
    async fn list_pending_txs(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<Vec<PendingTx>, NonceStoreError> {
        let mut conn = self.redis.clone();
        let hashes: Vec<String> = conn
            .zrange(self.pending_zset_key(chain_id, address), 0, -1)
            .await?;

        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.pending_data_key(chain_id, address))
            .arg(&hashes)
            .query_async(&mut conn)
            .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for (hash, row) in hashes.iter().zip(rows) {
            match row {
                Some(json) => match serde_json::from_str::<PendingTx>(&json) {
                    Ok(tx) => pending.push(tx),
                    Err(e) => {
                        tracing::error!(
                            chain_id = chain_id,
                            address = %address,
                            hash = %hash,
                            error = %e,
                            "Skipping undecodable pending transaction row"
                        );
                    }
                },
                None => {
                    tracing::warn!(
                        chain_id = chain_id,
                        address = %address,
                        hash = %hash,
                        "Pending transaction index entry has no data row"
                    );
                }
            }
        }

        // zrange already orders by score, sort again to break score ties deterministically
        pending.sort_by_key(|tx| tx.nonce);
        Ok(pending)
    }

    async fn insert_pending_tx(&self, tx: &PendingTx) -> Result<(), NonceStoreError> {
        let data_key = self.pending_data_key(tx.chain_id, tx.address);
        let mut conn = self.redis.clone();

        let exists: bool = conn.hexists(&data_key, tx.hash.to_string()).await?;
        if exists {
            return Err(NonceStoreError::Duplicate {
                chain_id: tx.chain_id,
                address: tx.address,
                hash: tx.hash,
            });
        }

        let json = serde_json::to_string(tx)?;
        let mut pipeline = redis::pipe();
        pipeline
            .atomic()
            .zadd(
                self.pending_zset_key(tx.chain_id, tx.address),
                tx.hash.to_string(),
                tx.nonce,
            )
            .ignore()
            .hset(&data_key, tx.hash.to_string(), json)
            .ignore();

        pipeline.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn delete_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        hash: B256,
    ) -> Result<(), NonceStoreError> {
        let mut conn = self.redis.clone();
        let mut pipeline = redis::pipe();
        pipeline
            .atomic()
            .zrem(self.pending_zset_key(chain_id, address), hash.to_string())
            .ignore()
            .hdel(self.pending_data_key(chain_id, address), hash.to_string())
            .ignore();

        pipeline.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn replace_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        old_hash: B256,
        new_hash: B256,
    ) -> Result<PendingTx, NonceStoreError> {
        if self
            .get_pending_tx(chain_id, address, new_hash)
            .await?
            .is_some()
        {
            return Err(NonceStoreError::Duplicate {
                chain_id,
                address,
                hash: new_hash,
            });
        }

        let existing = self
            .get_pending_tx(chain_id, address, old_hash)
            .await?
            .ok_or(NonceStoreError::NotFound {
                chain_id,
                address,
                hash: old_hash,
            })?;

        let replaced = existing.replaced_by(new_hash);
        let json = serde_json::to_string(&replaced)?;
        let zset_key = self.pending_zset_key(chain_id, address);
        let data_key = self.pending_data_key(chain_id, address);

        let mut conn = self.redis.clone();
        let mut pipeline = redis::pipe();
        pipeline
            .atomic()
            .zrem(&zset_key, old_hash.to_string())
            .ignore()
            .hdel(&data_key, old_hash.to_string())
            .ignore()
            .zadd(&zset_key, new_hash.to_string(), replaced.nonce)
            .ignore()
            .hset(&data_key, new_hash.to_string(), json)
            .ignore();

        pipeline.query_async::<()>(&mut conn).await?;
        Ok(replaced)
    }
}
