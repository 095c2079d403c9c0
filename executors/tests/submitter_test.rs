mod fixtures;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy::{
    consensus::{Transaction, TxEnvelope},
    eips::eip2718::Decodable2718,
    primitives::{Address, Bytes, U256, keccak256},
    signers::local::PrivateKeySigner,
};
use fixtures::*;
use validator_core::{chain::TransactionInfo, error::ChainClientError};
use validator_executors::{
    EoaSubmitter, SubmitError, SubmitRequest, TrackerConfig, nonce::TrackerError,
    retry_on_nonce_conflict,
};

fn signer() -> PrivateKeySigner {
    ANVIL_KEY.parse().unwrap()
}

fn request() -> SubmitRequest {
    SubmitRequest {
        to: Address::repeat_byte(0x11),
        value: U256::ZERO,
        input: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
        gas_limit: 100_000,
    }
}

fn decode(raw: &Bytes) -> TxEnvelope {
    TxEnvelope::decode_2718(&mut raw.as_ref()).expect("valid signed transaction")
}

async fn submitter(
    chain: MockChainClient,
    config: TrackerConfig,
) -> EoaSubmitter<Arc<FlakyStore>, MockChainClient> {
    let tracker = Arc::new(tracker_with(Arc::new(FlakyStore::new()), chain.clone(), config).await);
    EoaSubmitter::new(tracker, chain, signer()).unwrap()
}

#[tokio::test]
async fn test_submit_signs_sends_and_tracks() {
    let chain = MockChainClient::new(10);
    let submitter = submitter(chain.clone(), manual_config()).await;

    let hash = submitter.submit(&request()).await.unwrap();

    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(hash, keccak256(&sent[0]));

    let envelope = decode(&sent[0]);
    assert_eq!(envelope.nonce(), 10);
    assert_eq!(envelope.chain_id(), Some(CHAIN_ID));
    assert_eq!(envelope.gas_price(), Some(1_000_000_000));
    assert_eq!(envelope.to(), Some(Address::repeat_byte(0x11)));

    let pending = submitter.tracker().pending_txs().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].hash, hash);
    assert_eq!(pending[0].nonce, 10);
}

#[tokio::test]
async fn test_nonce_too_low_resyncs_and_retries_once() {
    let chain = MockChainClient::new(10);
    let submitter = submitter(chain.clone(), manual_config()).await;

    // another process used nonces 10 and 11
    chain.set_pending_nonce(12);
    chain.with_state(|s| {
        s.send_results
            .push_back(Err(rpc_error("nonce too low: next nonce 12, tx nonce 10")));
    });

    submitter.submit(&request()).await.unwrap();

    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(decode(&sent[0]).nonce(), 12);
    assert_eq!(submitter.tracker().snapshot().await.current_nonce, 13);
}

#[tokio::test]
async fn test_second_conflict_is_surfaced() {
    let chain = MockChainClient::new(10);
    let submitter = submitter(chain.clone(), manual_config()).await;

    chain.with_state(|s| {
        s.send_results
            .push_back(Err(rpc_error("invalid transaction nonce")));
        s.send_results
            .push_back(Err(rpc_error("invalid transaction nonce")));
    });

    let result = submitter.submit(&request()).await;
    assert!(matches!(result, Err(SubmitError::Chain(_))));
    assert!(chain.with_state(|s| s.send_results.is_empty()));
    assert_eq!(submitter.tracker().pending_count().await, 0);
}

#[tokio::test]
async fn test_other_send_errors_are_not_retried() {
    let chain = MockChainClient::new(10);
    let submitter = submitter(chain.clone(), manual_config()).await;

    chain.with_state(|s| {
        s.send_results
            .push_back(Err(rpc_error("insufficient funds for gas * price + value")));
        s.send_results.push_back(Ok(()));
    });

    let result = submitter.submit(&request()).await;
    assert!(matches!(result, Err(SubmitError::Chain(_))));
    assert_eq!(chain.with_state(|s| s.send_results.len()), 1);
    assert_eq!(chain.with_state(|s| s.pending_nonce_requests), 1);
    assert_eq!(submitter.tracker().get_nonce().await.nonce(), 10);
}

#[tokio::test]
async fn test_retry_returns_original_error_when_resync_fails() {
    let chain = MockChainClient::new(3);
    let tracker = tracker_with(Arc::new(FlakyStore::new()), chain.clone(), manual_config()).await;
    chain.with_state(|s| s.fail_pending_nonce = true);

    let calls = &AtomicUsize::new(0);
    let result: Result<(), TrackerError> = retry_on_nonce_conflict(&tracker, move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(TrackerError::Chain(rpc_error("nonce too low")))
    })
    .await;

    match result {
        Err(TrackerError::Chain(e)) => assert!(e.to_string().contains("nonce too low")),
        other => panic!("expected the original error, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_passes_success_through_without_resync() {
    let chain = MockChainClient::new(3);
    let tracker = tracker_with(Arc::new(FlakyStore::new()), chain.clone(), manual_config()).await;
    let requests_after_init = chain.with_state(|s| s.pending_nonce_requests);

    let value = retry_on_nonce_conflict(&tracker, || async { Ok::<_, TrackerError>(7) })
        .await
        .unwrap();

    assert_eq!(value, 7);
    assert_eq!(
        chain.with_state(|s| s.pending_nonce_requests),
        requests_after_init
    );
}

#[tokio::test]
async fn test_signer_must_match_tracked_wallet() {
    let chain = MockChainClient::new(0);
    let tracker = Arc::new(
        validator_executors::LocalTracker::new(
            Address::repeat_byte(0x22),
            Arc::new(FlakyStore::new()),
            CHAIN_ID,
            chain.clone(),
            manual_config(),
        )
        .await
        .unwrap(),
    );

    let result = EoaSubmitter::new(tracker, chain, signer());
    assert!(matches!(result, Err(SubmitError::SignerMismatch { .. })));
}

#[tokio::test]
async fn test_bump_gas_replaces_pending_at_higher_price() {
    let chain = MockChainClient::new(4);
    let submitter = submitter(chain.clone(), manual_config())
        .await
        .with_bump_percent(20);

    let original = submitter.submit(&request()).await.unwrap();
    let pending = submitter.tracker().pending_txs().await.remove(0);

    let bumped = submitter.bump_gas(&pending, &request()).await.unwrap();
    assert_eq!(bumped.nonce, 4);
    assert_eq!(bumped.bump_price_count, 1);
    assert_ne!(bumped.hash, original);

    let sent = chain.sent();
    assert_eq!(sent.len(), 2);
    let replacement = decode(&sent[1]);
    assert_eq!(replacement.nonce(), 4);
    assert_eq!(replacement.gas_price(), Some(1_200_000_000));
    assert_eq!(bumped.hash, keccak256(&sent[1]));

    let second = submitter.bump_gas(&bumped, &request()).await.unwrap();
    assert_eq!(second.bump_price_count, 2);
    assert_eq!(decode(&chain.sent()[2]).gas_price(), Some(1_400_000_000));

    let tracked = submitter.tracker().pending_txs().await;
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].hash, second.hash);
}

#[tokio::test]
async fn test_bump_gas_refuses_mined_transaction() {
    let chain = MockChainClient::new(0);
    let submitter = submitter(chain.clone(), manual_config()).await;

    let hash = submitter.submit(&request()).await.unwrap();
    chain.with_state(|s| {
        s.transactions.insert(
            hash,
            TransactionInfo {
                hash,
                nonce: 0,
                block_number: Some(77),
                gas_price: 1_000_000_000,
            },
        );
    });

    let pending = submitter.tracker().pending_txs().await.remove(0);
    let result = submitter.bump_gas(&pending, &request()).await;
    assert!(matches!(
        result,
        Err(SubmitError::AlreadyMined {
            block_number: 77,
            ..
        })
    ));
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_bump_gas_outbids_original_after_price_drop() {
    let chain = MockChainClient::new(4);
    let submitter = submitter(chain.clone(), manual_config()).await;

    let original = submitter.submit(&request()).await.unwrap();
    chain.with_state(|s| {
        s.transactions.insert(
            original,
            TransactionInfo {
                hash: original,
                nonce: 4,
                block_number: None,
                gas_price: 1_000_000_000,
            },
        );
        s.gas_price = 500_000_000;
    });

    let pending = submitter.tracker().pending_txs().await.remove(0);
    submitter.bump_gas(&pending, &request()).await.unwrap();

    let sent = chain.sent();
    let original_price = decode(&sent[0]).gas_price().unwrap();
    let replacement_price = decode(&sent[1]).gas_price().unwrap();
    assert_eq!(original_price, 1_000_000_000);
    assert_eq!(replacement_price, 1_100_000_000);
    assert!(replacement_price > original_price);
}

#[tokio::test]
async fn test_hanging_broadcast_times_out_and_releases_nonce() {
    let chain = MockChainClient::new(10);
    let config = TrackerConfig {
        rpc_timeout: Duration::from_millis(200),
        ..manual_config()
    };
    let submitter = Arc::new(submitter(chain.clone(), config).await);
    chain.with_state(|s| s.send_delay = Some(Duration::from_secs(3600)));

    let background = tokio::spawn({
        let submitter = submitter.clone();
        async move { submitter.submit(&request()).await }
    });
    // let the submit take the nonce lock first
    tokio::time::sleep(Duration::from_millis(50)).await;

    let lease = tokio::time::timeout(Duration::from_secs(5), submitter.tracker().get_nonce())
        .await
        .expect("nonce lock should be released once the broadcast times out");
    assert_eq!(lease.nonce(), 10);
    lease.unlock();

    let result = background.await.unwrap();
    match result {
        Err(SubmitError::Chain(ChainClientError::Timeout { operation, .. })) => {
            assert_eq!(operation, "send_raw_transaction");
        }
        other => panic!("expected a send timeout, got {other:?}"),
    }
    assert!(chain.sent().is_empty());
    assert_eq!(submitter.tracker().pending_count().await, 0);
}
