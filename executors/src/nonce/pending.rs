use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A signed and broadcast transaction that is not yet confirmed at the
/// required depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTx {
    pub chain_id: u64,
    pub address: Address,
    pub nonce: u64,
    pub hash: B256,
    pub created_at: DateTime<Utc>,
    /// Number of times this nonce was resubmitted at a higher gas price
    pub bump_price_count: u32,
    /// Hashes this transaction was broadcast under before its latest bump,
    /// oldest first. Any of them may be the one that gets mined.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaced_hashes: Vec<B256>,
}

impl PendingTx {
    pub fn new(chain_id: u64, address: Address, nonce: u64, hash: B256) -> Self {
        Self {
            chain_id,
            address,
            nonce,
            hash,
            created_at: Utc::now(),
            bump_price_count: 0,
            replaced_hashes: Vec::new(),
        }
    }

    /// Same logical transaction under a new hash, as produced by a gas bump.
    pub fn replaced_by(&self, new_hash: B256) -> Self {
        let mut replaced_hashes = self.replaced_hashes.clone();
        replaced_hashes.push(self.hash);
        Self {
            hash: new_hash,
            bump_price_count: self.bump_price_count + 1,
            replaced_hashes,
            ..self.clone()
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaced_by_keeps_nonce_and_creation_time() {
        let tx = PendingTx::new(1, Address::ZERO, 7, B256::with_last_byte(1));
        let bumped = tx.replaced_by(B256::with_last_byte(2));

        assert_eq!(bumped.nonce, 7);
        assert_eq!(bumped.created_at, tx.created_at);
        assert_eq!(bumped.hash, B256::with_last_byte(2));
        assert_eq!(bumped.bump_price_count, 1);
        assert_eq!(bumped.replaced_hashes, vec![B256::with_last_byte(1)]);

        let twice = bumped.replaced_by(B256::with_last_byte(3));
        assert_eq!(twice.bump_price_count, 2);
        assert_eq!(
            twice.replaced_hashes,
            vec![B256::with_last_byte(1), B256::with_last_byte(2)]
        );
    }

    #[test]
    fn test_serializes_camel_case() {
        let tx = PendingTx::new(137, Address::ZERO, 3, B256::ZERO);
        let json = serde_json::to_value(&tx).unwrap();

        assert_eq!(json["chainId"], 137);
        assert_eq!(json["bumpPriceCount"], 0);
        assert!(json.get("replacedHashes").is_none());
        let back: PendingTx = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }
}
