pub mod confirm;
pub mod error;
pub mod pending;
pub mod redis_store;
pub mod registry;
pub mod store;
pub mod tracker;

pub use confirm::{ConfirmationReport, HaltedCheck};
pub use error::{ConfirmationError, TrackerError};
pub use pending::PendingTx;
pub use redis_store::RedisNonceStore;
pub use registry::TrackerRegistry;
pub use store::{InMemoryNonceStore, NonceStore, NonceStoreError};
pub use tracker::{LocalTracker, NonceLease, NonceTracker, TrackerConfig};
