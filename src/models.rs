//! Records shared between the persistence collaborators and the core services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Camera liveness status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    #[default]
    Online,
    Offline,
    Maintenance,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Online => "online",
            CameraStatus::Offline => "offline",
            CameraStatus::Maintenance => "maintenance",
        }
    }
}

/// Username/password pair configured for a camera's native stream
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub property_id: String,
    #[serde(default)]
    pub name: String,
    /// Network address of the device
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Native source address, may embed credentials
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Externally visible playback address, if one was provisioned
    #[serde(default)]
    pub playback_url: Option<String>,
    #[serde(default)]
    pub status: CameraStatus,
    #[serde(default)]
    pub recording: bool,
    #[serde(default)]
    pub diagnostics: serde_json::Value,
    #[serde(default)]
    pub last_image: Option<String>,
}

/// One-to-one companion of a camera, mutated by every poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraHealthRecord {
    pub camera_id: String,
    pub last_liveness_at: Option<DateTime<Utc>>,
    pub last_diagnostics_at: Option<DateTime<Utc>>,
    pub last_image: Option<String>,
    pub diagnostics: serde_json::Value,
}

impl CameraHealthRecord {
    /// Empty record as created on first poll
    pub fn new(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            last_liveness_at: None,
            last_diagnostics_at: None,
            last_image: None,
            diagnostics: serde_json::Value::Null,
        }
    }
}

/// Fields of a camera the core subsystem is allowed to write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraStateUpdate {
    pub status: Option<CameraStatus>,
    pub diagnostics: Option<serde_json::Value>,
    pub last_image: Option<String>,
}

impl CameraStateUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.diagnostics.is_none() && self.last_image.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locker {
    pub id: String,
    /// Numeric label printed on the locker door
    pub number: u32,
    pub property_id: String,
}
