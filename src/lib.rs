pub mod api;
pub mod app;
pub mod breaker;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod models;
pub mod repository;
pub mod resolver;
pub mod transcode;

pub use api::{build_router, ApiServer, ApiServerBuilder};
pub use app::{ComponentState, Services, ShutdownReason, StaywatchOrchestrator};
pub use breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use bridge::{BridgeClient, BridgeStatus, ReleaseOutcome};
pub use config::StaywatchConfig;
pub use error::{BridgeError, Result, StaywatchError, StreamError};
pub use events::{EventBus, StaywatchEvent};
pub use health::{DiagnosticsCollector, HealthPoller, PollSummary, TcpProbeCollector};
pub use models::{Camera, CameraHealthRecord, CameraStateUpdate, CameraStatus, Credentials, Locker};
pub use repository::{CameraRepository, LockerDirectory, MemoryCameraRepository, MemoryLockerDirectory};
pub use resolver::StreamUrlResolver;
pub use transcode::{EnsureOutcome, SessionInfo, TranscodeSupervisor};
