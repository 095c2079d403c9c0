use std::{collections::HashMap, sync::Arc};

use alloy::primitives::Address;
use futures::future::join_all;
use validator_core::chain::ChainClient;

use super::{store::NonceStore, tracker::LocalTracker};

/// Trackers keyed by `(chain_id, wallet)`, built once at startup and shared
/// with request handlers.
pub struct TrackerRegistry<T> {
    trackers: HashMap<(u64, Address), Arc<T>>,
}

impl<T> Default for TrackerRegistry<T> {
    fn default() -> Self {
        Self {
            trackers: HashMap::new(),
        }
    }
}

impl<T> TrackerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tracker previously registered for the same key, if any.
    pub fn insert(&mut self, chain_id: u64, wallet: Address, tracker: T) -> Option<Arc<T>> {
        self.trackers.insert((chain_id, wallet), Arc::new(tracker))
    }

    pub fn get(&self, chain_id: u64, wallet: Address) -> Option<Arc<T>> {
        self.trackers.get(&(chain_id, wallet)).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u64, Address), &Arc<T>)> {
        self.trackers.iter()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

impl<S: NonceStore, C: ChainClient> TrackerRegistry<LocalTracker<S, C>> {
    /// Stops every tracker and waits for all reconciliation loops.
    pub async fn shutdown_all(&self) {
        tracing::info!(trackers = self.trackers.len(), "Shutting down nonce trackers");
        join_all(self.trackers.values().map(|tracker| tracker.shutdown())).await;
    }
}
