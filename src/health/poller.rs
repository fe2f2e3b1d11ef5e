use super::collector::DiagnosticsCollector;
use crate::config::PollerConfig;
use crate::error::Result;
use crate::events::{EventBus, StaywatchEvent};
use crate::models::{Camera, CameraStateUpdate, CameraStatus};
use crate::repository::CameraRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters from one pass over all cameras
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub cameras: usize,
    pub offline: usize,
    pub diagnosed: usize,
    pub failures: usize,
}

/// Background task keeping camera liveness and diagnostics current
pub struct HealthPoller {
    repository: Arc<dyn CameraRepository>,
    collector: Arc<dyn DiagnosticsCollector>,
    event_bus: EventBus,
    config: PollerConfig,
}

impl HealthPoller {
    pub fn new(
        repository: Arc<dyn CameraRepository>,
        collector: Arc<dyn DiagnosticsCollector>,
        event_bus: EventBus,
        config: PollerConfig,
    ) -> Self {
        Self {
            repository,
            collector,
            event_bus,
            config,
        }
    }

    /// Default still-image reference for a camera
    pub fn default_image_ref(&self, camera_id: &str) -> String {
        format!(
            "{}/{}/latest.jpg",
            self.config.snapshot_root.trim_end_matches('/'),
            camera_id
        )
    }

    /// Loop until `cancel` fires, sleeping the liveness interval between passes
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.liveness_interval_secs,
            diagnostics_secs = self.config.diagnostics_interval_secs,
            "Health poller started"
        );

        loop {
            match self.poll_once().await {
                Ok(summary) => debug!(?summary, "Health poll finished"),
                Err(e) => warn!(error = %e, "Health poll iteration failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.liveness_interval()) => {}
            }
        }

        info!("Health poller stopped");
    }

    pub async fn poll_once(&self) -> Result<PollSummary> {
        self.poll_once_at(Utc::now()).await
    }

    /// One pass over all cameras using `now` as the liveness timestamp
    pub async fn poll_once_at(&self, now: DateTime<Utc>) -> Result<PollSummary> {
        let cameras = self.repository.list_cameras().await?;
        let mut summary = PollSummary {
            cameras: cameras.len(),
            ..PollSummary::default()
        };

        for camera in &cameras {
            match self.poll_camera(camera, now).await {
                Ok(outcome) => {
                    if outcome.offline {
                        summary.offline += 1;
                    }
                    if outcome.diagnosed {
                        summary.diagnosed += 1;
                    }
                }
                Err(e) => {
                    summary.failures += 1;
                    warn!(camera_id = %camera.id, error = %e, "Failed to poll camera");
                }
            }
        }

        Ok(summary)
    }

    async fn poll_camera(&self, camera: &Camera, now: DateTime<Utc>) -> Result<CameraOutcome> {
        let mut record = self.repository.get_or_create_health(&camera.id).await?;
        let mut update = CameraStateUpdate::default();

        record.last_liveness_at = Some(now);

        let status = next_status(camera);
        if status != camera.status {
            update.status = Some(status);
        }

        let image = record
            .last_image
            .clone()
            .or_else(|| camera.last_image.clone())
            .unwrap_or_else(|| self.default_image_ref(&camera.id));
        if camera.last_image.is_none() {
            update.last_image = Some(image.clone());
        }
        record.last_image = Some(image);

        let diagnostics_due = match record.last_diagnostics_at {
            None => true,
            Some(at) => (now - at)
                .to_std()
                .map(|age| age >= self.config.diagnostics_interval())
                .unwrap_or(false),
        };

        if diagnostics_due {
            let diagnostics = self.collector.collect(camera).await;
            record.diagnostics = diagnostics.clone();
            record.last_diagnostics_at = Some(now);
            update.diagnostics = Some(diagnostics);
        }

        self.repository.save_health(record).await?;

        if !update.is_empty() {
            self.repository
                .update_camera_state(&camera.id, update)
                .await?;
        }

        if status != camera.status {
            info!(
                camera_id = %camera.id,
                from = camera.status.as_str(),
                to = status.as_str(),
                "Camera status changed"
            );
            let _ = self.event_bus.publish(StaywatchEvent::CameraStatusChanged {
                camera_id: camera.id.clone(),
                status: status.as_str().to_string(),
                timestamp: SystemTime::now(),
            });
        }

        Ok(CameraOutcome {
            offline: status == CameraStatus::Offline,
            diagnosed: diagnostics_due,
        })
    }
}

struct CameraOutcome {
    offline: bool,
    diagnosed: bool,
}

fn has_value(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// A camera missing either address is offline. An offline camera that has
/// both again comes back online.
fn next_status(camera: &Camera) -> CameraStatus {
    let addressable = has_value(&camera.ip_address) && has_value(&camera.stream_url);
    match (camera.status, addressable) {
        (_, false) => CameraStatus::Offline,
        (CameraStatus::Offline, true) => CameraStatus::Online,
        (status, true) => status,
    }
}
