use super::*;
use crate::config::StaywatchConfig;
use crate::error::{Result, StaywatchError};
use crate::events::{EventBus, StaywatchEvent};
use crate::models::{Camera, CameraHealthRecord, CameraStateUpdate, CameraStatus};
use crate::repository::{CameraRepository, MemoryCameraRepository};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingCollector {
    calls: AtomicUsize,
}

#[async_trait]
impl DiagnosticsCollector for CountingCollector {
    async fn collect(&self, camera: &Camera) -> Value {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        json!({ "camera": camera.id, "run": n })
    }
}

fn camera(id: &str, ip: Option<&str>, stream: Option<&str>) -> Camera {
    Camera {
        id: id.to_string(),
        property_id: "prop-1".to_string(),
        name: id.to_string(),
        ip_address: ip.map(str::to_string),
        stream_url: stream.map(str::to_string),
        credentials: None,
        playback_url: None,
        status: CameraStatus::Online,
        recording: false,
        diagnostics: Value::Null,
        last_image: None,
    }
}

fn poller_for(
    cameras: Vec<Camera>,
    bus: EventBus,
) -> (HealthPoller, Arc<MemoryCameraRepository>, Arc<CountingCollector>) {
    let repository = Arc::new(MemoryCameraRepository::new(cameras));
    let collector = Arc::new(CountingCollector::default());
    let poller = HealthPoller::new(
        repository.clone(),
        collector.clone(),
        bus,
        StaywatchConfig::default().poller,
    );
    (poller, repository, collector)
}

#[tokio::test]
async fn test_first_poll_creates_record_and_diagnostics() {
    let cam = camera("cam-1", Some("10.0.0.5"), Some("rtsp://10.0.0.5/stream1"));
    let (poller, repository, collector) = poller_for(vec![cam], EventBus::new(16));

    let now = Utc::now();
    let summary = poller.poll_once_at(now).await.unwrap();
    assert_eq!(summary.cameras, 1);
    assert_eq!(summary.diagnosed, 1);
    assert_eq!(summary.failures, 0);

    let record = repository.get_health("cam-1").await.unwrap().unwrap();
    assert_eq!(record.last_liveness_at, Some(now));
    assert_eq!(record.last_diagnostics_at, Some(now));
    assert_eq!(record.last_image.as_deref(), Some("snapshots/cam-1/latest.jpg"));
    assert_eq!(record.diagnostics["run"], 1);

    let stored = repository.get_camera("cam-1").await.unwrap().unwrap();
    assert_eq!(stored.diagnostics["camera"], "cam-1");
    assert_eq!(stored.last_image.as_deref(), Some("snapshots/cam-1/latest.jpg"));
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_diagnostics_are_throttled() {
    let cam = camera("cam-1", Some("10.0.0.5"), Some("rtsp://10.0.0.5/stream1"));
    let (poller, repository, collector) = poller_for(vec![cam], EventBus::new(16));

    let start = Utc::now();
    poller.poll_once_at(start).await.unwrap();

    let later = start + ChronoDuration::seconds(30);
    let summary = poller.poll_once_at(later).await.unwrap();
    assert_eq!(summary.diagnosed, 0);
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);

    let record = repository.get_health("cam-1").await.unwrap().unwrap();
    assert_eq!(record.last_liveness_at, Some(later));
    assert_eq!(record.last_diagnostics_at, Some(start));

    let much_later = start + ChronoDuration::seconds(301);
    let summary = poller.poll_once_at(much_later).await.unwrap();
    assert_eq!(summary.diagnosed, 1);
    assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_address_marks_offline() {
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let cams = vec![
        camera("cam-1", None, Some("rtsp://10.0.0.5/stream1")),
        camera("cam-2", Some("10.0.0.6"), Some("  ")),
    ];
    let (poller, repository, _) = poller_for(cams, bus);

    let summary = poller.poll_once().await.unwrap();
    assert_eq!(summary.offline, 2);

    for id in ["cam-1", "cam-2"] {
        let stored = repository.get_camera(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CameraStatus::Offline);
    }

    match events.recv().await.unwrap() {
        StaywatchEvent::CameraStatusChanged { status, .. } => assert_eq!(status, "offline"),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_offline_camera_recovers() {
    let mut cam = camera("cam-1", Some("10.0.0.5"), Some("rtsp://10.0.0.5/stream1"));
    cam.status = CameraStatus::Offline;
    let (poller, repository, _) = poller_for(vec![cam], EventBus::new(16));

    poller.poll_once().await.unwrap();
    let stored = repository.get_camera("cam-1").await.unwrap().unwrap();
    assert_eq!(stored.status, CameraStatus::Online);
}

#[tokio::test]
async fn test_existing_image_reference_is_kept() {
    let mut cam = camera("cam-1", Some("10.0.0.5"), Some("rtsp://10.0.0.5/stream1"));
    cam.last_image = Some("snapshots/custom/lobby.jpg".to_string());
    let (poller, repository, _) = poller_for(vec![cam], EventBus::new(16));

    poller.poll_once().await.unwrap();
    let record = repository.get_health("cam-1").await.unwrap().unwrap();
    assert_eq!(record.last_image.as_deref(), Some("snapshots/custom/lobby.jpg"));
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let cam = camera("cam-1", Some("10.0.0.5"), Some("rtsp://10.0.0.5/stream1"));
    let (poller, repository, _) = poller_for(vec![cam], EventBus::new(16));
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(Arc::new(poller).run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poller did not stop")
        .unwrap();
    assert!(repository.get_health("cam-1").await.unwrap().is_some());
}

/// Repository whose first camera listing fails and whose health lookup
/// fails once for one camera
struct FlakyRepository {
    inner: MemoryCameraRepository,
    list_failures: AtomicUsize,
    health_failures: AtomicUsize,
    failing_camera: String,
}

impl FlakyRepository {
    fn new(cameras: Vec<Camera>, list_failures: usize, failing_camera: &str) -> Self {
        Self {
            inner: MemoryCameraRepository::new(cameras),
            list_failures: AtomicUsize::new(list_failures),
            health_failures: AtomicUsize::new(1),
            failing_camera: failing_camera.to_string(),
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CameraRepository for FlakyRepository {
    async fn list_cameras(&self) -> Result<Vec<Camera>> {
        if Self::take_failure(&self.list_failures) {
            return Err(StaywatchError::system("camera store unavailable"));
        }
        self.inner.list_cameras().await
    }

    async fn get_camera(&self, camera_id: &str) -> Result<Option<Camera>> {
        self.inner.get_camera(camera_id).await
    }

    async fn update_camera_state(
        &self,
        camera_id: &str,
        update: CameraStateUpdate,
    ) -> Result<()> {
        self.inner.update_camera_state(camera_id, update).await
    }

    async fn get_or_create_health(
        &self,
        camera_id: &str,
    ) -> Result<CameraHealthRecord> {
        if camera_id == self.failing_camera && Self::take_failure(&self.health_failures) {
            return Err(StaywatchError::system("health table locked"));
        }
        self.inner.get_or_create_health(camera_id).await
    }

    async fn save_health(&self, record: CameraHealthRecord) -> Result<()> {
        self.inner.save_health(record).await
    }

    async fn get_health(
        &self,
        camera_id: &str,
    ) -> Result<Option<CameraHealthRecord>> {
        self.inner.get_health(camera_id).await
    }
}

fn flaky_poller(repository: Arc<FlakyRepository>, liveness_interval_secs: u64) -> HealthPoller {
    let mut config = StaywatchConfig::default().poller;
    config.liveness_interval_secs = liveness_interval_secs;
    HealthPoller::new(
        repository,
        Arc::new(CountingCollector::default()),
        EventBus::new(16),
        config,
    )
}

#[tokio::test]
async fn test_failing_camera_is_counted_and_others_polled() {
    let cameras = vec![
        camera("cam-bad", Some("10.0.0.5"), Some("rtsp://10.0.0.5/s")),
        camera("cam-good", Some("10.0.0.6"), Some("rtsp://10.0.0.6/s")),
    ];
    let repository = Arc::new(FlakyRepository::new(cameras, 0, "cam-bad"));
    let poller = flaky_poller(repository.clone(), 30);

    let summary = poller.poll_once().await.unwrap();
    assert_eq!(summary.cameras, 2);
    assert_eq!(summary.failures, 1);
    assert!(repository.get_health("cam-bad").await.unwrap().is_none());
    assert!(repository.get_health("cam-good").await.unwrap().is_some());

    let summary = poller.poll_once().await.unwrap();
    assert_eq!(summary.failures, 0);
    assert!(repository.get_health("cam-bad").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_run_continues_after_failed_iteration() {
    let cameras = vec![camera("cam-1", Some("10.0.0.5"), Some("rtsp://10.0.0.5/s"))];
    let repository = Arc::new(FlakyRepository::new(cameras, 1, "none"));
    let poller = Arc::new(flaky_poller(repository.clone(), 1));
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(poller.run(cancel.clone()));

    // First pass fails to list cameras, nothing is recorded yet
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(repository.get_health("cam-1").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let record = repository.get_health("cam-1").await.unwrap().unwrap();
    assert!(record.last_liveness_at.is_some());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_tcp_probe_reports_reachability() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let reachable = camera(
        "cam-1",
        Some("127.0.0.1"),
        Some(&format!("rtsp://user:pw@127.0.0.1:{}/stream1", port)),
    );
    let collector = TcpProbeCollector::new(Duration::from_millis(500));
    let diagnostics = collector.collect(&reachable).await;
    assert_eq!(diagnostics["reachable"], true);
    assert_eq!(diagnostics["protocol"], "rtsp");
    assert_eq!(diagnostics["port"], port);
    assert_eq!(diagnostics["transcoder"], "unknown");
    assert!(diagnostics["latency_ms"].is_u64());

    let unaddressed = camera("cam-2", None, None);
    let diagnostics = collector.collect(&unaddressed).await;
    assert_eq!(diagnostics["reachable"], false);
}

#[test]
fn test_probe_target_defaults() {
    let cam = camera("c", Some("10.0.0.7"), Some("rtsp://10.0.0.5/stream1"));
    assert_eq!(
        probe_target(&cam),
        Some(("10.0.0.5".to_string(), 554, "rtsp".to_string()))
    );

    let cam = camera("c", Some("10.0.0.7"), None);
    assert_eq!(
        probe_target(&cam),
        Some(("10.0.0.7".to_string(), 554, "rtsp".to_string()))
    );

    let cam = camera("c", None, Some("https://cdn.example.com/live.m3u8"));
    assert_eq!(
        probe_target(&cam),
        Some(("cdn.example.com".to_string(), 443, "https".to_string()))
    );
}
