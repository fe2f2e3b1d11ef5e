use super::orchestrator::{COMPONENT_API, COMPONENT_POLLER, COMPONENT_TRANSCODER};
use super::{ComponentState, StaywatchOrchestrator};
use crate::api::ApiServerBuilder;
use crate::error::Result;
use crate::events::StaywatchEvent;
use crate::transcode::find_executable;
use std::sync::Arc;
use tracing::{error, info, warn};

impl StaywatchOrchestrator {
    /// Prepare the filesystem and register components
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing Staywatch components");

        let mut states = self.component_states.lock().await;
        states.insert(COMPONENT_TRANSCODER.to_string(), ComponentState::Stopped);
        states.insert(COMPONENT_POLLER.to_string(), ComponentState::Stopped);
        states.insert(COMPONENT_API.to_string(), ComponentState::Stopped);
        drop(states);

        let output_root = &self.config.transcoder.output_root;
        tokio::fs::create_dir_all(output_root).await.map_err(|e| {
            error!(path = %output_root.display(), error = %e, "Cannot create transcoder output root");
            e
        })?;

        match find_executable(&self.config.transcoder.binary) {
            Some(path) => info!(binary = %path.display(), "Transcoder found"),
            None => warn!(
                binary = %self.config.transcoder.binary,
                "Transcoder not found, native camera streams will be unavailable"
            ),
        }

        if self.config.bridge.endpoint().is_none() {
            info!("Hardware bridge not configured, locker releases will report not_configured");
        }

        info!(
            cameras = self.config.cameras.len(),
            lockers = self.config.lockers.len(),
            "All components initialized successfully"
        );
        Ok(())
    }

    /// Start the poller and the API server
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting Staywatch");

        // The supervisor is passive; sessions start on the first playback request
        self.set_component_state(COMPONENT_TRANSCODER, ComponentState::Running)
            .await;

        if self.config.poller.enabled {
            self.set_component_state(COMPONENT_POLLER, ComponentState::Starting)
                .await;

            let poller = Arc::new(self.services.health_poller());
            let cancel = self.cancellation_token.child_token();
            self.poller_task = Some(tokio::spawn(poller.run(cancel)));

            self.set_component_state(COMPONENT_POLLER, ComponentState::Running)
                .await;
            info!("Health poller started");
        } else {
            info!("Health poller disabled by configuration");
        }

        self.set_component_state(COMPONENT_API, ComponentState::Starting)
            .await;

        let server = ApiServerBuilder::new()
            .config(self.config.server.clone())
            .services(Arc::clone(&self.services))
            .build()?;

        let listener = match server.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.set_component_state(COMPONENT_API, ComponentState::Failed)
                    .await;
                error!("Failed to start API server: {}", e);
                return Err(e);
            }
        };
        self.local_addr = listener.local_addr().ok();

        let cancel = self.cancellation_token.child_token();
        let event_bus = self.services.event_bus.clone();
        self.server_task = Some(tokio::spawn(async move {
            let result = server.serve(listener, cancel).await;
            if let Err(e) = &result {
                error!("API server error: {}", e);
                let _ = event_bus.publish(StaywatchEvent::SystemError {
                    component: COMPONENT_API.to_string(),
                    error: e.to_string(),
                });
            }
            result
        }));

        self.set_component_state(COMPONENT_API, ComponentState::Running)
            .await;
        info!(
            "API server started on {}",
            self.local_addr
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| format!("{}:{}", self.config.server.ip, self.config.server.port))
        );

        info!("Staywatch started successfully");
        Ok(())
    }
}
