use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::bridge::BridgeClient;
use crate::config::StaywatchConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::health::{HealthPoller, TcpProbeCollector};
use crate::repository::{
    CameraRepository, LockerDirectory, MemoryCameraRepository, MemoryLockerDirectory,
};
use crate::resolver::StreamUrlResolver;
use crate::transcode::TranscodeSupervisor;
use std::sync::Arc;

/// Registry of the long-lived services shared by the HTTP layer and the poller
#[derive(Clone)]
pub struct Services {
    pub config: Arc<StaywatchConfig>,
    pub event_bus: EventBus,
    pub cameras: Arc<dyn CameraRepository>,
    pub lockers: Arc<dyn LockerDirectory>,
    pub supervisor: Arc<TranscodeSupervisor>,
    pub bridge_breaker: Arc<CircuitBreaker>,
    pub bridge: Arc<BridgeClient>,
    pub resolver: Arc<StreamUrlResolver>,
    /// Client used by the same-origin gateway proxy
    pub gateway_client: reqwest::Client,
}

impl Services {
    /// Wire every service around the given persistence collaborators
    pub fn new(
        config: StaywatchConfig,
        cameras: Arc<dyn CameraRepository>,
        lockers: Arc<dyn LockerDirectory>,
        event_bus: EventBus,
    ) -> Result<Self> {
        let supervisor = Arc::new(TranscodeSupervisor::new(
            config.transcoder.clone(),
            event_bus.clone(),
        ));

        let bridge_breaker = Arc::new(CircuitBreaker::new(
            "hardware_bridge",
            CircuitBreakerConfig {
                failure_threshold: config.bridge.failure_threshold,
                recovery_timeout: config.bridge.recovery_timeout(),
            },
        ));

        let bridge = Arc::new(BridgeClient::new(
            &config.bridge,
            bridge_breaker.clone(),
            lockers.clone(),
            event_bus.clone(),
        )?);

        let resolver = Arc::new(StreamUrlResolver::new(
            config.gateway.base_url.as_deref(),
            config.gateway.proxy_prefix.clone(),
        ));

        let gateway_client = reqwest::Client::builder()
            .timeout(config.gateway.request_timeout())
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            event_bus,
            cameras,
            lockers,
            supervisor,
            bridge_breaker,
            bridge,
            resolver,
            gateway_client,
        })
    }

    /// Services backed by the in-memory repositories seeded from configuration
    pub fn from_config(config: StaywatchConfig, event_bus: EventBus) -> Result<Self> {
        let cameras = Arc::new(MemoryCameraRepository::new(config.cameras.clone()));
        let lockers = Arc::new(MemoryLockerDirectory::new(config.lockers.clone()));
        Self::new(config, cameras, lockers, event_bus)
    }

    /// Health poller using the TCP probe and this registry's supervisor
    pub fn health_poller(&self) -> HealthPoller {
        let collector = TcpProbeCollector::new(self.config.poller.probe_timeout())
            .with_supervisor(self.supervisor.clone());

        HealthPoller::new(
            self.cameras.clone(),
            Arc::new(collector),
            self.event_bus.clone(),
            self.config.poller.clone(),
        )
    }
}
