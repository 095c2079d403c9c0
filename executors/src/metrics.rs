use alloy::primitives::{Address, U256, utils::format_ether};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder, register_gauge_vec_with_registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
};
use std::sync::Arc;

const TRACKER_LABELS: &[&str] = &["chain_id", "wallet"];

/// Metrics exported by nonce trackers, all labelled by chain id and wallet
pub struct NonceTrackerMetrics {
    pub current_nonce: IntGaugeVec,
    pub pending_txs: IntGaugeVec,
    pub wallet_balance_eth: GaugeVec,
    pub txn_confirmation_attempts: IntGaugeVec,
    pub chain_client_unhealthy: IntGaugeVec,
    pub unconfirmed_txn_deletions: IntCounterVec,
    pub gas_bumps: IntCounterVec,
    pub pending_to_confirmed_duration: HistogramVec,
    pub stuck_transaction_age: HistogramVec,
}

impl NonceTrackerMetrics {
    /// Create new tracker metrics with the provided registry
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let current_nonce = register_int_gauge_vec_with_registry!(
            Opts::new(
                "validator_nonce_tracker_current_nonce",
                "Next nonce the tracker will hand out"
            ),
            TRACKER_LABELS,
            registry
        )?;

        let pending_txs = register_int_gauge_vec_with_registry!(
            Opts::new(
                "validator_nonce_tracker_pending_txs",
                "Transactions submitted but not yet confirmed at the required depth"
            ),
            TRACKER_LABELS,
            registry
        )?;

        let wallet_balance_eth = register_gauge_vec_with_registry!(
            Opts::new(
                "validator_nonce_tracker_wallet_balance_eth",
                "Last observed wallet balance in ether"
            ),
            TRACKER_LABELS,
            registry
        )?;

        let txn_confirmation_attempts = register_int_gauge_vec_with_registry!(
            Opts::new(
                "validator_nonce_tracker_txn_confirmation_attempts",
                "Consecutive receipt lookups for the oldest pending transaction that found it possibly stuck"
            ),
            TRACKER_LABELS,
            registry
        )?;

        let chain_client_unhealthy = register_int_gauge_vec_with_registry!(
            Opts::new(
                "validator_nonce_tracker_chain_client_unhealthy",
                "Consecutive failed balance reads, zero when the chain client is healthy"
            ),
            TRACKER_LABELS,
            registry
        )?;

        let unconfirmed_txn_deletions = register_int_counter_vec_with_registry!(
            Opts::new(
                "validator_nonce_tracker_unconfirmed_txn_deletions_total",
                "Pending transactions deleted before they were confirmed"
            ),
            TRACKER_LABELS,
            registry
        )?;

        let gas_bumps = register_int_counter_vec_with_registry!(
            Opts::new(
                "validator_nonce_tracker_gas_bumps_total",
                "Pending transactions replaced at a higher gas price"
            ),
            TRACKER_LABELS,
            registry
        )?;

        let pending_to_confirmed_duration = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "validator_nonce_tracker_pending_to_confirmed_duration_seconds",
                "Time from registering a transaction to confirming it at the required depth"
            )
            .buckets(vec![
                1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0
            ]),
            TRACKER_LABELS,
            registry
        )?;

        let stuck_transaction_age = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "validator_nonce_tracker_stuck_transaction_age_seconds",
                "Age of pending transactions flagged as possibly stuck"
            )
            .buckets(vec![
                60.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0, 7200.0, 14400.0
            ]),
            TRACKER_LABELS,
            registry
        )?;

        Ok(NonceTrackerMetrics {
            current_nonce,
            pending_txs,
            wallet_balance_eth,
            txn_confirmation_attempts,
            chain_client_unhealthy,
            unconfirmed_txn_deletions,
            gas_bumps,
            pending_to_confirmed_duration,
            stuck_transaction_age,
        })
    }
}

lazy_static! {
    /// Default metrics registry for trackers (fallback if no external registry provided)
    static ref DEFAULT_TRACKER_METRICS_REGISTRY: Registry = Registry::new();

    /// Default tracker metrics instance (used when no external metrics are provided)
    static ref DEFAULT_TRACKER_METRICS: Arc<NonceTrackerMetrics> = Arc::new(
        NonceTrackerMetrics::new(&DEFAULT_TRACKER_METRICS_REGISTRY)
            .expect("Failed to create default nonce tracker metrics")
    );

    /// Global metrics instance - can be set by the binary crate or uses default
    static ref TRACKER_METRICS_INSTANCE: std::sync::RwLock<Option<Arc<NonceTrackerMetrics>>> =
        std::sync::RwLock::new(None);
}

/// Initialize tracker metrics with a custom registry
/// This should be called once at application startup by the binary crate
pub fn initialize_metrics(metrics: NonceTrackerMetrics) {
    let mut instance = TRACKER_METRICS_INSTANCE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *instance = Some(Arc::new(metrics));
}

/// Get the current metrics instance (either custom or default)
fn get_metrics() -> Arc<NonceTrackerMetrics> {
    let instance = TRACKER_METRICS_INSTANCE
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match instance.as_ref() {
        Some(metrics) => metrics.clone(),
        None => DEFAULT_TRACKER_METRICS.clone(),
    }
}

/// Export metrics in Prometheus format from the default registry
/// For custom registries, the binary crate should handle metrics export directly
pub fn export_default_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = DEFAULT_TRACKER_METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Point-in-time view of a tracker, as published to the gauges
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub chain_id: u64,
    pub wallet: Address,
    pub current_nonce: u64,
    pub pending_count: usize,
    pub wei_balance: U256,
    pub confirmation_attempts: u64,
    pub chain_client_unhealthy: u64,
}

/// Lossy conversion for gauges; balances beyond f64 precision are not interesting here
fn wei_to_eth(balance: U256) -> f64 {
    format_ether(balance).parse().unwrap_or(f64::MAX)
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub fn record_tracker_state(snapshot: &TrackerSnapshot) {
    let metrics = get_metrics();
    let chain_id = snapshot.chain_id.to_string();
    let wallet = snapshot.wallet.to_string();
    let labels = [chain_id.as_str(), wallet.as_str()];

    metrics
        .current_nonce
        .with_label_values(&labels)
        .set(saturating_i64(snapshot.current_nonce));
    metrics
        .pending_txs
        .with_label_values(&labels)
        .set(saturating_i64(snapshot.pending_count as u64));
    metrics
        .wallet_balance_eth
        .with_label_values(&labels)
        .set(wei_to_eth(snapshot.wei_balance));
    metrics
        .txn_confirmation_attempts
        .with_label_values(&labels)
        .set(saturating_i64(snapshot.confirmation_attempts));
    metrics
        .chain_client_unhealthy
        .with_label_values(&labels)
        .set(saturating_i64(snapshot.chain_client_unhealthy));
}

pub fn record_unconfirmed_txn_deletion(chain_id: u64, wallet: Address) {
    let metrics = get_metrics();
    metrics
        .unconfirmed_txn_deletions
        .with_label_values(&[&chain_id.to_string(), &wallet.to_string()])
        .inc();
}

pub fn record_gas_bump(chain_id: u64, wallet: Address) {
    let metrics = get_metrics();
    metrics
        .gas_bumps
        .with_label_values(&[&chain_id.to_string(), &wallet.to_string()])
        .inc();
}

pub fn record_transaction_confirmed(chain_id: u64, wallet: Address, duration_seconds: f64) {
    let metrics = get_metrics();
    metrics
        .pending_to_confirmed_duration
        .with_label_values(&[&chain_id.to_string(), &wallet.to_string()])
        .observe(duration_seconds);
}

pub fn record_stuck_transaction(chain_id: u64, wallet: Address, age_seconds: f64) {
    let metrics = get_metrics();
    metrics
        .stuck_transaction_age
        .with_label_values(&[&chain_id.to_string(), &wallet.to_string()])
        .observe(age_seconds);
}
