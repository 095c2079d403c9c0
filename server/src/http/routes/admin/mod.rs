pub mod metrics;
pub mod nonce_trackers;
