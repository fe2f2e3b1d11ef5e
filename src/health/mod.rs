mod collector;
mod poller;
#[cfg(test)]
mod tests;

pub use collector::{probe_target, DiagnosticsCollector, TcpProbeCollector};
pub use poller::{HealthPoller, PollSummary};
