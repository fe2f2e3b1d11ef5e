mod client;
mod types;

pub use client::BridgeClient;
pub use types::{BridgeStatus, ReleaseOutcome};
