use std::{future::Future, sync::Arc};

use alloy::{
    eips::BlockNumberOrTag,
    network::{ReceiptResponse, TransactionResponse},
    primitives::{Address, B256, Bytes, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    transports::http::reqwest::Url,
};
use serde::{Deserialize, Serialize};

use crate::error::{AlloyRpcErrorToChainError, ChainClientError};

/// Receipt data the nonce tracker needs to judge inclusion depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptInfo {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub status: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderInfo {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub hash: B256,
    pub nonce: u64,
    /// `None` while the transaction is still in the mempool
    pub block_number: Option<u64>,
    /// Legacy gas price, or max fee per gas for dynamic fee transactions
    pub gas_price: u128,
}

/// Narrow read-only view of a chain.
///
/// Missing receipts and transactions are reported as [`ChainClientError::NotFound`]
/// so callers can tell "not mined yet" apart from a failing endpoint.
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Next nonce for `address`, counting transactions still in the mempool.
    fn pending_nonce_at(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<u64, ChainClientError>> + Send;

    fn transaction_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<ReceiptInfo, ChainClientError>> + Send;

    fn head_header(&self) -> impl Future<Output = Result<HeaderInfo, ChainClientError>> + Send;

    fn balance_at(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<U256, ChainClientError>> + Send;

    fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<TransactionInfo, ChainClientError>> + Send;

    /// Suggested legacy gas price in wei.
    fn suggest_gas_price(&self) -> impl Future<Output = Result<u128, ChainClientError>> + Send;
}

/// Write side used by transaction submitters.
pub trait TransactionBroadcaster: ChainClient {
    fn send_raw_transaction(
        &self,
        raw: Bytes,
    ) -> impl Future<Output = Result<B256, ChainClientError>> + Send;
}

impl<C: ChainClient> ChainClient for Arc<C> {
    fn chain_id(&self) -> u64 {
        (**self).chain_id()
    }

    fn pending_nonce_at(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<u64, ChainClientError>> + Send {
        (**self).pending_nonce_at(address)
    }

    fn transaction_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<ReceiptInfo, ChainClientError>> + Send {
        (**self).transaction_receipt(hash)
    }

    fn head_header(&self) -> impl Future<Output = Result<HeaderInfo, ChainClientError>> + Send {
        (**self).head_header()
    }

    fn balance_at(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<U256, ChainClientError>> + Send {
        (**self).balance_at(address)
    }

    fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<TransactionInfo, ChainClientError>> + Send {
        (**self).transaction_by_hash(hash)
    }

    fn suggest_gas_price(&self) -> impl Future<Output = Result<u128, ChainClientError>> + Send {
        (**self).suggest_gas_price()
    }
}

impl<C: TransactionBroadcaster> TransactionBroadcaster for Arc<C> {
    fn send_raw_transaction(
        &self,
        raw: Bytes,
    ) -> impl Future<Output = Result<B256, ChainClientError>> + Send {
        (**self).send_raw_transaction(raw)
    }
}

pub struct AlloyChainConfig<'a> {
    pub chain_id: u64,
    pub rpc_url: &'a str,
}

/// [`ChainClient`] backed by an alloy HTTP provider.
#[derive(Clone)]
pub struct AlloyChainClient {
    chain_id: u64,
    rpc_url: Url,
    provider: RootProvider,
}

impl AlloyChainConfig<'_> {
    pub fn to_client(&self) -> Result<AlloyChainClient, ChainClientError> {
        let rpc_url = Url::parse(self.rpc_url).map_err(|e| ChainClientError::RpcConfigError {
            message: format!("Failed to parse RPC URL for chain {}: {e}", self.chain_id),
        })?;

        Ok(AlloyChainClient {
            chain_id: self.chain_id,
            rpc_url: rpc_url.clone(),
            provider: ProviderBuilder::new()
                .disable_recommended_fillers()
                .connect_http(rpc_url),
        })
    }
}

impl AlloyChainClient {
    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    fn not_found(&self, what: String) -> ChainClientError {
        ChainClientError::NotFound {
            chain_id: self.chain_id,
            what,
        }
    }
}

impl ChainClient for AlloyChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn pending_nonce_at(&self, address: Address) -> Result<u64, ChainClientError> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| e.to_chain_error(self.chain_id, self.rpc_url.as_str()))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<ReceiptInfo, ChainClientError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| e.to_chain_error(self.chain_id, self.rpc_url.as_str()))?
            .ok_or_else(|| self.not_found(format!("receipt for {hash}")))?;

        // some nodes hand out receipts for pending blocks without a number
        let block_number = receipt
            .block_number
            .ok_or_else(|| self.not_found(format!("mined receipt for {hash}")))?;

        Ok(ReceiptInfo {
            transaction_hash: receipt.transaction_hash,
            block_number,
            status: ReceiptResponse::status(&receipt),
        })
    }

    async fn head_header(&self) -> Result<HeaderInfo, ChainClientError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| e.to_chain_error(self.chain_id, self.rpc_url.as_str()))?
            .ok_or_else(|| self.not_found("latest block".to_string()))?;

        Ok(HeaderInfo {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        })
    }

    async fn balance_at(&self, address: Address) -> Result<U256, ChainClientError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| e.to_chain_error(self.chain_id, self.rpc_url.as_str()))
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<TransactionInfo, ChainClientError> {
        let transaction = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| e.to_chain_error(self.chain_id, self.rpc_url.as_str()))?
            .ok_or_else(|| self.not_found(format!("transaction {hash}")))?;

        Ok(TransactionInfo {
            hash: TransactionResponse::tx_hash(&transaction),
            nonce: alloy::consensus::Transaction::nonce(&transaction),
            block_number: transaction.block_number,
            gas_price: alloy::consensus::Transaction::max_fee_per_gas(&transaction),
        })
    }

    async fn suggest_gas_price(&self) -> Result<u128, ChainClientError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| e.to_chain_error(self.chain_id, self.rpc_url.as_str()))
    }
}

impl TransactionBroadcaster for AlloyChainClient {
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ChainClientError> {
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| e.to_chain_error(self.chain_id, self.rpc_url.as_str()))?;

        tracing::debug!(
            chain_id = self.chain_id,
            hash = %pending.tx_hash(),
            "Raw transaction accepted by node"
        );
        Ok(*pending.tx_hash())
    }
}
