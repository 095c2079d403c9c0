pub mod config;
pub mod http;
pub mod store;
pub mod trackers;

pub use config::{ChainConfig, ServerConfig, TrackerSettings, ValidatorConfig};
pub use http::server::{ValidatorServer, ValidatorServerState};
pub use store::NonceStoreBackend;
pub use trackers::{NodeTracker, NodeTrackerRegistry, build_trackers};
