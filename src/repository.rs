//! Persistence collaborators consumed by the core services.
//!
//! The real deployment backs these with the property database. The in-memory
//! implementations here are seeded from configuration and used by the binary
//! and the tests.

use crate::error::{Result, StaywatchError};
use crate::models::{Camera, CameraHealthRecord, CameraStateUpdate, Locker};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Read cameras and write the fields the health poller owns
#[async_trait]
pub trait CameraRepository: Send + Sync {
    async fn list_cameras(&self) -> Result<Vec<Camera>>;

    async fn get_camera(&self, camera_id: &str) -> Result<Option<Camera>>;

    async fn update_camera_state(&self, camera_id: &str, update: CameraStateUpdate) -> Result<()>;

    /// Return the health record for a camera, creating an empty one if none exists.
    ///
    /// Fails with `NotFound` when the camera itself is unknown.
    async fn get_or_create_health(&self, camera_id: &str) -> Result<CameraHealthRecord>;

    async fn save_health(&self, record: CameraHealthRecord) -> Result<()>;

    async fn get_health(&self, camera_id: &str) -> Result<Option<CameraHealthRecord>>;
}

/// Read-only locker lookup scoped to a property
#[async_trait]
pub trait LockerDirectory: Send + Sync {
    /// Find a locker by id or by its numeric label within the property
    async fn find_locker(&self, property_id: &str, identifier: &str) -> Result<Option<Locker>>;
}

/// In-memory camera repository
pub struct MemoryCameraRepository {
    cameras: RwLock<HashMap<String, Camera>>,
    health: RwLock<HashMap<String, CameraHealthRecord>>,
}

impl MemoryCameraRepository {
    pub fn new(cameras: Vec<Camera>) -> Self {
        Self {
            cameras: RwLock::new(cameras.into_iter().map(|c| (c.id.clone(), c)).collect()),
            health: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert_camera(&self, camera: Camera) {
        self.cameras.write().await.insert(camera.id.clone(), camera);
    }

    /// Remove a camera together with its health record
    pub async fn remove_camera(&self, camera_id: &str) -> Option<Camera> {
        self.health.write().await.remove(camera_id);
        self.cameras.write().await.remove(camera_id)
    }
}

#[async_trait]
impl CameraRepository for MemoryCameraRepository {
    async fn list_cameras(&self) -> Result<Vec<Camera>> {
        let cameras = self.cameras.read().await;
        let mut list: Vec<Camera> = cameras.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn get_camera(&self, camera_id: &str) -> Result<Option<Camera>> {
        Ok(self.cameras.read().await.get(camera_id).cloned())
    }

    async fn update_camera_state(&self, camera_id: &str, update: CameraStateUpdate) -> Result<()> {
        let mut cameras = self.cameras.write().await;
        let camera = cameras
            .get_mut(camera_id)
            .ok_or_else(|| StaywatchError::not_found(format!("camera {}", camera_id)))?;

        if let Some(status) = update.status {
            camera.status = status;
        }
        if let Some(diagnostics) = update.diagnostics {
            camera.diagnostics = diagnostics;
        }
        if let Some(last_image) = update.last_image {
            camera.last_image = Some(last_image);
        }

        Ok(())
    }

    async fn get_or_create_health(&self, camera_id: &str) -> Result<CameraHealthRecord> {
        if !self.cameras.read().await.contains_key(camera_id) {
            return Err(StaywatchError::not_found(format!("camera {}", camera_id)));
        }

        let mut health = self.health.write().await;
        let record = health.entry(camera_id.to_string()).or_insert_with(|| {
            debug!(camera_id = %camera_id, "Creating health record");
            CameraHealthRecord::new(camera_id)
        });

        Ok(record.clone())
    }

    async fn save_health(&self, record: CameraHealthRecord) -> Result<()> {
        if !self.cameras.read().await.contains_key(&record.camera_id) {
            return Err(StaywatchError::not_found(format!(
                "camera {}",
                record.camera_id
            )));
        }

        self.health
            .write()
            .await
            .insert(record.camera_id.clone(), record);
        Ok(())
    }

    async fn get_health(&self, camera_id: &str) -> Result<Option<CameraHealthRecord>> {
        Ok(self.health.read().await.get(camera_id).cloned())
    }
}

/// In-memory locker directory
pub struct MemoryLockerDirectory {
    lockers: Vec<Locker>,
}

impl MemoryLockerDirectory {
    pub fn new(lockers: Vec<Locker>) -> Self {
        Self { lockers }
    }
}

#[async_trait]
impl LockerDirectory for MemoryLockerDirectory {
    async fn find_locker(&self, property_id: &str, identifier: &str) -> Result<Option<Locker>> {
        let identifier = identifier.trim();
        let label = identifier.parse::<u32>().ok();

        let found = self
            .lockers
            .iter()
            .filter(|locker| locker.property_id == property_id)
            .find(|locker| locker.id == identifier || Some(locker.number) == label)
            .cloned();

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CameraStatus;

    fn camera(id: &str) -> Camera {
        Camera {
            id: id.to_string(),
            property_id: "prop-1".to_string(),
            name: format!("Camera {}", id),
            ip_address: Some("10.0.0.10".to_string()),
            stream_url: Some("rtsp://10.0.0.10/stream1".to_string()),
            credentials: None,
            playback_url: None,
            status: CameraStatus::Online,
            recording: false,
            diagnostics: serde_json::Value::Null,
            last_image: None,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_health_creates_once() {
        let repo = MemoryCameraRepository::new(vec![camera("cam-1")]);

        let mut record = repo.get_or_create_health("cam-1").await.unwrap();
        assert!(record.last_liveness_at.is_none());

        record.last_image = Some("snapshots/cam-1/latest.jpg".to_string());
        repo.save_health(record).await.unwrap();

        let again = repo.get_or_create_health("cam-1").await.unwrap();
        assert_eq!(again.last_image.as_deref(), Some("snapshots/cam-1/latest.jpg"));
    }

    #[tokio::test]
    async fn test_health_requires_existing_camera() {
        let repo = MemoryCameraRepository::new(vec![]);
        let result = repo.get_or_create_health("ghost").await;
        assert!(matches!(result, Err(StaywatchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_camera_drops_health() {
        let repo = MemoryCameraRepository::new(vec![camera("cam-1")]);
        repo.get_or_create_health("cam-1").await.unwrap();
        repo.remove_camera("cam-1").await.unwrap();
        assert!(repo.get_health("cam-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_camera_state_partial() {
        let repo = MemoryCameraRepository::new(vec![camera("cam-1")]);
        repo.update_camera_state(
            "cam-1",
            CameraStateUpdate {
                status: Some(CameraStatus::Offline),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let cam = repo.get_camera("cam-1").await.unwrap().unwrap();
        assert_eq!(cam.status, CameraStatus::Offline);
        assert!(cam.last_image.is_none());
    }

    #[tokio::test]
    async fn test_find_locker_by_id_or_label() {
        let directory = MemoryLockerDirectory::new(vec![
            Locker {
                id: "locker-a".to_string(),
                number: 12,
                property_id: "prop-1".to_string(),
            },
            Locker {
                id: "locker-b".to_string(),
                number: 12,
                property_id: "prop-2".to_string(),
            },
        ]);

        let by_id = directory.find_locker("prop-1", "locker-a").await.unwrap();
        assert_eq!(by_id.unwrap().number, 12);

        let by_label = directory.find_locker("prop-2", "12").await.unwrap();
        assert_eq!(by_label.unwrap().id, "locker-b");

        let other_property = directory.find_locker("prop-2", "locker-a").await.unwrap();
        assert!(other_property.is_none());
    }
}
