pub mod chain;
pub mod error;
