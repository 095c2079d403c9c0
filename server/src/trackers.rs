use std::sync::Arc;

use validator_core::chain::{AlloyChainClient, AlloyChainConfig};
use validator_executors::{LocalTracker, TrackerRegistry};

use crate::{config::ValidatorConfig, store::NonceStoreBackend};

pub type NodeTracker = LocalTracker<NonceStoreBackend, Arc<AlloyChainClient>>;
pub type NodeTrackerRegistry = TrackerRegistry<NodeTracker>;

/// Builds one tracker per configured `(chain_id, wallet)`.
///
/// Any tracker failing to initialize aborts startup; a node that cannot
/// read its own nonce must not start signing.
pub async fn build_trackers(
    config: &ValidatorConfig,
    store: NonceStoreBackend,
) -> anyhow::Result<NodeTrackerRegistry> {
    let mut registry = TrackerRegistry::new();

    for chain in &config.chains {
        let client = AlloyChainConfig {
            chain_id: chain.chain_id,
            rpc_url: &chain.rpc_url,
        }
        .to_client()?;

        let tracker = LocalTracker::new(
            chain.wallet_address,
            store.clone(),
            chain.chain_id,
            Arc::new(client),
            config.tracker.for_chain(chain),
        )
        .await?;

        if registry
            .insert(chain.chain_id, chain.wallet_address, tracker)
            .is_some()
        {
            anyhow::bail!(
                "Wallet {} is configured twice for chain {}",
                chain.wallet_address,
                chain.chain_id
            );
        }

        tracing::info!(
            chain_id = chain.chain_id,
            wallet = %chain.wallet_address,
            "Nonce tracker started"
        );
    }

    Ok(registry)
}
