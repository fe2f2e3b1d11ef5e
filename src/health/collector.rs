use crate::models::Camera;
use crate::transcode::TranscodeSupervisor;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

const DEFAULT_RTSP_PORT: u16 = 554;
const DEFAULT_RTSPS_PORT: u16 = 322;

/// Produces the diagnostics blob stored on a camera and its health record
#[async_trait]
pub trait DiagnosticsCollector: Send + Sync {
    async fn collect(&self, camera: &Camera) -> Value;
}

/// Host and port to probe for a camera, plus the source protocol
pub fn probe_target(camera: &Camera) -> Option<(String, u16, String)> {
    if let Some(url) = camera
        .stream_url
        .as_deref()
        .and_then(|s| Url::parse(s.trim()).ok())
    {
        if let Some(host) = url.host_str() {
            let port = url.port_or_known_default().unwrap_or(match url.scheme() {
                "rtsps" => DEFAULT_RTSPS_PORT,
                _ => DEFAULT_RTSP_PORT,
            });
            let host = host.trim_start_matches('[').trim_end_matches(']');
            return Some((host.to_string(), port, url.scheme().to_string()));
        }
    }

    camera
        .ip_address
        .as_deref()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| (ip.to_string(), DEFAULT_RTSP_PORT, "rtsp".to_string()))
}

/// TCP connect probe against the camera's source address
pub struct TcpProbeCollector {
    probe_timeout: Duration,
    supervisor: Option<Arc<TranscodeSupervisor>>,
}

impl TcpProbeCollector {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probe_timeout,
            supervisor: None,
        }
    }

    /// Include transcoder session state in the diagnostics
    pub fn with_supervisor(mut self, supervisor: Arc<TranscodeSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    async fn probe(&self, host: &str, port: u16) -> (bool, Option<u64>, Option<String>) {
        let started = Instant::now();
        match timeout(self.probe_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => (true, Some(started.elapsed().as_millis() as u64), None),
            Ok(Err(e)) => (false, None, Some(e.to_string())),
            Err(_) => (
                false,
                None,
                Some(format!(
                    "connect timed out after {}ms",
                    self.probe_timeout.as_millis()
                )),
            ),
        }
    }
}

#[async_trait]
impl DiagnosticsCollector for TcpProbeCollector {
    async fn collect(&self, camera: &Camera) -> Value {
        let transcoder = match &self.supervisor {
            Some(supervisor) if supervisor.is_running(&camera.id).await => "running",
            Some(_) => "idle",
            None => "unknown",
        };

        let Some((host, port, protocol)) = probe_target(camera) else {
            return json!({
                "reachable": false,
                "error": "no network address configured",
                "transcoder": transcoder,
                "collected_at": Utc::now().to_rfc3339(),
            });
        };

        let (reachable, latency_ms, error) = self.probe(&host, port).await;
        debug!(camera_id = %camera.id, %host, port, reachable, "Diagnostics probe finished");

        json!({
            "reachable": reachable,
            "host": host,
            "port": port,
            "protocol": protocol,
            "latency_ms": latency_ms,
            "error": error,
            "transcoder": transcoder,
            "collected_at": Utc::now().to_rfc3339(),
        })
    }
}
