#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use alloy::primitives::{Address, B256, Bytes, U256, address, keccak256};
use chrono::Utc;
use validator_core::{
    chain::{ChainClient, HeaderInfo, ReceiptInfo, TransactionBroadcaster, TransactionInfo},
    error::{ChainClientError, RpcErrorKind, RpcErrorResponse},
};
use validator_executors::{
    LocalTracker, TrackerConfig,
    nonce::{InMemoryNonceStore, NonceStore, NonceStoreError, PendingTx},
};

pub const CHAIN_ID: u64 = 31337;

// first anvil dev account
pub const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const WALLET: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

pub fn hash(n: u64) -> B256 {
    B256::left_padding_from(&n.to_be_bytes())
}

pub fn setup_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "validator_executors=debug,validator_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// A JSON-RPC error response the way a node reports it.
pub fn rpc_error(message: &str) -> ChainClientError {
    ChainClientError::RpcError {
        chain_id: CHAIN_ID,
        rpc_url: "http://127.0.0.1:8545/".to_string(),
        message: message.to_string(),
        kind: RpcErrorKind::ErrorResp(RpcErrorResponse {
            code: -32000,
            message: message.to_string(),
            data: None,
        }),
    }
}

/// Config with a loop interval long enough that tests drive every pass.
pub fn manual_config() -> TrackerConfig {
    TrackerConfig {
        check_interval: Duration::from_secs(3600),
        min_block_chain_depth: 5,
        stuck_interval: Duration::from_secs(600),
        rpc_timeout: Duration::from_secs(2),
    }
}

pub fn pending_tx(nonce: u64, age: Duration) -> PendingTx {
    let mut tx = PendingTx::new(CHAIN_ID, WALLET, nonce, hash(nonce));
    tx.created_at = Utc::now() - chrono::Duration::from_std(age).unwrap();
    tx
}

#[derive(Default)]
pub struct MockChainState {
    pub pending_nonce: u64,
    pub fail_pending_nonce: bool,
    pub head_number: u64,
    /// Missing entries are reported as not found
    pub receipts: HashMap<B256, Result<ReceiptInfo, ChainClientError>>,
    pub transactions: HashMap<B256, TransactionInfo>,
    /// `None` makes balance reads fail
    pub balance: Option<U256>,
    pub gas_price: u128,
    /// Consumed front to back by sends, an empty queue accepts everything
    pub send_results: VecDeque<Result<(), ChainClientError>>,
    pub receipt_delay: Option<Duration>,
    pub send_delay: Option<Duration>,

    pub receipt_requests: Vec<B256>,
    pub pending_nonce_requests: usize,
    pub sent: Vec<Bytes>,
}

/// Scriptable chain for tracker and submitter tests.
#[derive(Clone)]
pub struct MockChainClient {
    chain_id: u64,
    state: Arc<Mutex<MockChainState>>,
}

impl MockChainClient {
    pub fn new(pending_nonce: u64) -> Self {
        Self {
            chain_id: CHAIN_ID,
            state: Arc::new(Mutex::new(MockChainState {
                pending_nonce,
                head_number: 100,
                balance: Some(U256::from(10u64).pow(U256::from(18u64))),
                gas_price: 1_000_000_000,
                ..Default::default()
            })),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockChainState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.with_state(|s| s.pending_nonce = nonce);
    }

    pub fn set_head(&self, number: u64) {
        self.with_state(|s| s.head_number = number);
    }

    pub fn mine(&self, hash: B256, block_number: u64) {
        self.with_state(|s| {
            s.receipts.insert(
                hash,
                Ok(ReceiptInfo {
                    transaction_hash: hash,
                    block_number,
                    status: true,
                }),
            );
        });
    }

    pub fn receipt_requests(&self) -> Vec<B256> {
        self.with_state(|s| s.receipt_requests.clone())
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.with_state(|s| s.sent.clone())
    }
}

impl ChainClient for MockChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn pending_nonce_at(&self, _address: Address) -> Result<u64, ChainClientError> {
        self.with_state(|s| {
            s.pending_nonce_requests += 1;
            if s.fail_pending_nonce {
                Err(rpc_error("connection refused"))
            } else {
                Ok(s.pending_nonce)
            }
        })
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<ReceiptInfo, ChainClientError> {
        let delay = self.with_state(|s| {
            s.receipt_requests.push(hash);
            s.receipt_delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.with_state(|s| match s.receipts.get(&hash) {
            Some(result) => result.clone(),
            None => Err(ChainClientError::NotFound {
                chain_id: CHAIN_ID,
                what: format!("receipt for {hash}"),
            }),
        })
    }

    async fn head_header(&self) -> Result<HeaderInfo, ChainClientError> {
        self.with_state(|s| {
            Ok(HeaderInfo {
                number: s.head_number,
                hash: hash(s.head_number),
                timestamp: 1_700_000_000 + s.head_number * 2,
            })
        })
    }

    async fn balance_at(&self, _address: Address) -> Result<U256, ChainClientError> {
        self.with_state(|s| s.balance.ok_or_else(|| rpc_error("balance unavailable")))
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<TransactionInfo, ChainClientError> {
        self.with_state(|s| {
            s.transactions
                .get(&hash)
                .cloned()
                .ok_or(ChainClientError::NotFound {
                    chain_id: CHAIN_ID,
                    what: format!("transaction {hash}"),
                })
        })
    }

    async fn suggest_gas_price(&self) -> Result<u128, ChainClientError> {
        self.with_state(|s| Ok(s.gas_price))
    }
}

impl TransactionBroadcaster for MockChainClient {
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ChainClientError> {
        if let Some(delay) = self.with_state(|s| s.send_delay) {
            tokio::time::sleep(delay).await;
        }

        self.with_state(|s| {
            s.send_results.pop_front().unwrap_or(Ok(()))?;
            s.sent.push(raw.clone());
            Ok(keccak256(&raw))
        })
    }
}

/// In-memory store whose operations can be made to fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryNonceStore,
    pub fail_list: AtomicBool,
    pub fail_insert: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(flag: &AtomicBool) -> Result<(), NonceStoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(NonceStoreError::RedisError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "simulated store outage",
            ))));
        }
        Ok(())
    }
}

impl NonceStore for FlakyStore {
    async fn list_pending_txs(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<Vec<PendingTx>, NonceStoreError> {
        Self::check(&self.fail_list)?;
        self.inner.list_pending_txs(chain_id, address).await
    }

    async fn insert_pending_tx(&self, tx: &PendingTx) -> Result<(), NonceStoreError> {
        Self::check(&self.fail_insert)?;
        self.inner.insert_pending_tx(tx).await
    }

    async fn delete_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        hash: B256,
    ) -> Result<(), NonceStoreError> {
        Self::check(&self.fail_delete)?;
        self.inner.delete_pending_tx(chain_id, address, hash).await
    }

    async fn replace_pending_tx(
        &self,
        chain_id: u64,
        address: Address,
        old_hash: B256,
        new_hash: B256,
    ) -> Result<PendingTx, NonceStoreError> {
        self.inner
            .replace_pending_tx(chain_id, address, old_hash, new_hash)
            .await
    }
}

pub type TestTracker = LocalTracker<Arc<FlakyStore>, MockChainClient>;

pub async fn tracker_with(
    store: Arc<FlakyStore>,
    chain: MockChainClient,
    config: TrackerConfig,
) -> TestTracker {
    LocalTracker::new(WALLET, store, CHAIN_ID, chain, config)
        .await
        .expect("tracker should initialize")
}

pub async fn stored(store: &FlakyStore) -> Vec<PendingTx> {
    store.inner.list_pending_txs(CHAIN_ID, WALLET).await.unwrap()
}
