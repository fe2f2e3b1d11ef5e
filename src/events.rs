use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events emitted by the core services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StaywatchEvent {
    /// A transcoder process was spawned for a camera
    TranscoderStarted {
        camera_id: String,
        session_id: String,
        pid: Option<u32>,
    },
    /// A transcoder process ended or was stopped
    TranscoderExited {
        camera_id: String,
        session_id: String,
        reason: String,
    },
    /// The poller changed a camera's liveness status
    CameraStatusChanged {
        camera_id: String,
        status: String,
        timestamp: SystemTime,
    },
    /// A locker release was attempted through the hardware bridge
    LockerReleaseAttempted {
        locker_id: String,
        requested_by: String,
        released: bool,
        bridge_status: String,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
}

impl StaywatchEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            StaywatchEvent::TranscoderStarted { camera_id, pid, .. } => {
                format!("Transcoder started for {} (pid {:?})", camera_id, pid)
            }
            StaywatchEvent::TranscoderExited {
                camera_id, reason, ..
            } => {
                format!("Transcoder for {} exited: {}", camera_id, reason)
            }
            StaywatchEvent::CameraStatusChanged {
                camera_id, status, ..
            } => {
                format!("Camera {} is now {}", camera_id, status)
            }
            StaywatchEvent::LockerReleaseAttempted {
                locker_id,
                bridge_status,
                released,
                ..
            } => {
                format!(
                    "Locker {} release attempted (released={}, bridge={})",
                    locker_id, released, bridge_status
                )
            }
            StaywatchEvent::SystemError { component, error } => {
                format!("System error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            StaywatchEvent::TranscoderStarted { .. } => "transcoder_started",
            StaywatchEvent::TranscoderExited { .. } => "transcoder_exited",
            StaywatchEvent::CameraStatusChanged { .. } => "camera_status_changed",
            StaywatchEvent::LockerReleaseAttempted { .. } => "locker_release_attempted",
            StaywatchEvent::SystemError { .. } => "system_error",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<StaywatchEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        Self {
            debug_logging: true,
            ..Self::new(capacity)
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<StaywatchEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Fails only when nobody is subscribed; publishers ignore that case.
    pub fn publish(&self, event: StaywatchEvent) -> Result<usize, EventBusError> {
        match &event {
            StaywatchEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            StaywatchEvent::TranscoderExited { .. } => {
                warn!("{}", event.description());
            }
            StaywatchEvent::LockerReleaseAttempted { .. } => {
                info!("{}", event.description());
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let delivered = bus
            .publish(StaywatchEvent::TranscoderStarted {
                camera_id: "cam-1".to_string(),
                session_id: "s1".to_string(),
                pid: Some(42),
            })
            .unwrap();
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "transcoder_started");
        assert!(event.description().contains("cam-1"));
    }

    #[test]
    fn test_publish_without_subscribers_fails() {
        let bus = EventBus::new(8);
        let result = bus.publish(StaywatchEvent::SystemError {
            component: "poller".to_string(),
            error: "boom".to_string(),
        });
        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
