pub mod metrics;
pub mod nonce;
pub mod retry;
pub mod submitter;

pub use nonce::{LocalTracker, NonceLease, NonceTracker, TrackerConfig, TrackerRegistry};
pub use retry::{NonceConflict, retry_on_nonce_conflict};
pub use submitter::{EoaSubmitter, SubmitError, SubmitRequest};
