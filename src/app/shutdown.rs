use super::orchestrator::{COMPONENT_API, COMPONENT_POLLER, COMPONENT_TRANSCODER};
use super::{ComponentState, StaywatchOrchestrator};
use crate::error::{Result, StaywatchError};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

impl StaywatchOrchestrator {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Cancel all background tasks
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        // Stop components in reverse dependency order
        for component in [COMPONENT_API, COMPONENT_POLLER, COMPONENT_TRANSCODER] {
            if let Err(e) = self.stop_component(component).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Stop a specific component
    async fn stop_component(&mut self, component: &str) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let result = match component {
            COMPONENT_API => match self.server_task.take() {
                Some(task) => {
                    self.await_stop(component, Duration::from_secs(10), async move {
                        task.await.map_err(|e| {
                            StaywatchError::component(component.to_string(), e.to_string())
                        })?
                    })
                    .await
                }
                None => Ok(()),
            },
            COMPONENT_POLLER => match self.poller_task.take() {
                Some(task) => {
                    self.await_stop(component, Duration::from_secs(5), async move {
                        task.await.map_err(|e| {
                            StaywatchError::component(component.to_string(), e.to_string())
                        })
                    })
                    .await
                }
                None => Ok(()),
            },
            COMPONENT_TRANSCODER => {
                let supervisor = self.services.supervisor.clone();
                let grace = self.config.transcoder.stop_grace() + Duration::from_secs(5);
                self.await_stop(component, grace, async move {
                    let stopped = supervisor.stop_all().await;
                    info!(stopped, "Transcoder sessions stopped");
                    Ok(())
                })
                .await
            }
            _ => Ok(()),
        };

        let state = if result.is_ok() {
            ComponentState::Stopped
        } else {
            ComponentState::Failed
        };
        self.set_component_state(component, state).await;

        if result.is_ok() {
            info!("{} component stopped", component);
        }
        result
    }

    async fn await_stop<F>(&self, component: &str, limit: Duration, stop: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match timeout(limit, stop).await {
            Ok(result) => result,
            Err(_) => {
                error!("{} component stop timeout", component);
                Err(StaywatchError::system(format!(
                    "{} component stop timeout",
                    component
                )))
            }
        }
    }
}
