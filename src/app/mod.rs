mod orchestrator;
mod runtime;
mod services;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::StaywatchOrchestrator;
pub use services::Services;
pub use types::{ComponentState, ShutdownReason};
