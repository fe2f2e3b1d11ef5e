use super::services::Services;
use super::types::{ComponentState, ShutdownReason};
use crate::config::StaywatchConfig;
use crate::error::Result;
use crate::events::EventBus;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Component names used in the lifecycle table
pub(super) const COMPONENT_TRANSCODER: &str = "transcoder";
pub(super) const COMPONENT_POLLER: &str = "poller";
pub(super) const COMPONENT_API: &str = "api";

/// Main application coordinator that owns the service registry and the
/// background tasks built on it
pub struct StaywatchOrchestrator {
    pub(super) config: StaywatchConfig,
    pub(super) services: Arc<Services>,

    // Background tasks
    pub(super) poller_task: Option<JoinHandle<()>>,
    pub(super) server_task: Option<JoinHandle<Result<()>>>,
    pub(super) local_addr: Option<SocketAddr>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl StaywatchOrchestrator {
    /// Create an orchestrator backed by the in-memory repositories seeded from `config`
    pub async fn new(config: StaywatchConfig) -> Result<Self> {
        let services = Services::from_config(config.clone(), EventBus::with_debug_logging(100))?;
        Ok(Self::with_services(config, services))
    }

    /// Create an orchestrator around an existing service registry
    pub fn with_services(config: StaywatchConfig, services: Services) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config,
            services: Arc::new(services),
            poller_task: None,
            server_task: None,
            local_addr: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Address the API server is listening on, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}
