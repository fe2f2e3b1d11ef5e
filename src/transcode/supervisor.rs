use super::diagnostics::failure_message;
use super::process::{
    authenticated_source, build_transcoder_args, drain_logs, find_executable, spawn_transcoder,
    terminate, LogBuffer,
};
use super::segments::{resolve_in_dir, validate_camera_id, SegmentFile};
use crate::config::TranscoderConfig;
use crate::error::StreamError;
use crate::events::{EventBus, StaywatchEvent};
use crate::models::Credentials;
use crate::resolver::{redact_credentials, MANIFEST_FILE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::process::Child;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

/// Result of asking for a camera's playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnsureOutcome {
    pub ready: bool,
    pub message: String,
}

impl EnsureOutcome {
    pub fn ready() -> Self {
        Self {
            ready: true,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ready: false,
            message: message.into(),
        }
    }
}

/// Snapshot of a running transcoder session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub camera_id: String,
    pub session_id: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

struct TranscodeSession {
    session_id: String,
    child: Child,
    log_task: Option<JoinHandle<()>>,
    logs: Arc<LogBuffer>,
    started_at: Instant,
    started_wall: DateTime<Utc>,
}

#[derive(Default)]
struct CameraSlot {
    session: Option<TranscodeSession>,
    last_exit: Option<Instant>,
    /// Session id and diagnostic of the most recent failed session
    last_failure: Option<(String, String)>,
}

enum SessionProbe {
    Running,
    Exited(String),
    Gone,
}

/// Keeps at most one transcoder alive per camera and hands out its playlist files.
///
/// Every camera gets its own async lock; all decisions about a camera's
/// process are made while holding it. Waiting for the first playlist happens
/// outside the lock so concurrent viewers of the same camera share one process.
pub struct TranscodeSupervisor {
    config: TranscoderConfig,
    slots: RwLock<HashMap<String, Arc<Mutex<CameraSlot>>>>,
    event_bus: EventBus,
}

impl TranscodeSupervisor {
    pub fn new(config: TranscoderConfig, event_bus: EventBus) -> Self {
        Self {
            config,
            slots: RwLock::new(HashMap::new()),
            event_bus,
        }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Output directory for a camera. Callers validate the id first.
    fn camera_dir(&self, camera_id: &str) -> PathBuf {
        self.config.output_root.join(camera_id)
    }

    async fn slot(&self, camera_id: &str) -> Arc<Mutex<CameraSlot>> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(camera_id) {
                return slot.clone();
            }
        }

        let mut slots = self.slots.write().await;
        slots
            .entry(camera_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CameraSlot::default())))
            .clone()
    }

    async fn existing_slot(&self, camera_id: &str) -> Option<Arc<Mutex<CameraSlot>>> {
        self.slots.read().await.get(camera_id).cloned()
    }

    /// Make sure a playlist for `camera_id` exists, starting a transcoder if needed
    pub async fn ensure_running(
        &self,
        camera_id: &str,
        source: &str,
        credentials: Option<&Credentials>,
    ) -> EnsureOutcome {
        if let Err(e) = validate_camera_id(camera_id) {
            return EnsureOutcome::failed(e.to_string());
        }

        let camera_dir = self.camera_dir(camera_id);
        let manifest = camera_dir.join(MANIFEST_FILE);

        if self.manifest_is_fresh(&manifest).await {
            debug!(camera_id = %camera_id, "Playlist is fresh, reusing");
            return EnsureOutcome::ready();
        }

        let Some(binary) = find_executable(&self.config.binary) else {
            warn!(binary = %self.config.binary, "Transcoder executable not found");
            return EnsureOutcome::failed(format!(
                "Transcoder '{}' is not available on this host",
                self.config.binary
            ));
        };

        let source_url = match authenticated_source(source, credentials) {
            Ok(url) => url,
            Err(message) => {
                warn!(camera_id = %camera_id, %message, "Rejected stream source");
                return EnsureOutcome::failed(message);
            }
        };

        let slot = self.slot(camera_id).await;
        let session_id = {
            let mut guard = slot.lock().await;
            self.reap_exited(camera_id, &mut guard).await;

            let running = guard.session.as_ref().map(|s| s.session_id.clone());
            match running {
                Some(session_id) => {
                    debug!(camera_id = %camera_id, session_id = %session_id, "Transcoder already running");
                    session_id
                }
                None => {
                    match self
                        .start_session(camera_id, &binary, &source_url, &camera_dir, &mut guard)
                        .await
                    {
                        Ok(session_id) => session_id,
                        Err(message) => return EnsureOutcome::failed(message),
                    }
                }
            }
        };

        self.wait_for_manifest(camera_id, &slot, &session_id, &manifest)
            .await
    }

    /// Resolve a file inside a camera's output directory
    pub async fn serve_segment(
        &self,
        camera_id: &str,
        relative: &str,
    ) -> Result<SegmentFile, StreamError> {
        validate_camera_id(camera_id)?;
        resolve_in_dir(&self.camera_dir(camera_id), relative).await
    }

    /// Stop a camera's transcoder. Returns whether one was running.
    pub async fn stop(&self, camera_id: &str) -> bool {
        let Some(slot) = self.existing_slot(camera_id).await else {
            return false;
        };

        let session = slot.lock().await.session.take();
        match session {
            Some(session) => {
                self.shutdown_session(camera_id, session, "stopped").await;
                true
            }
            None => false,
        }
    }

    /// Stop every transcoder. Returns how many were running.
    pub async fn stop_all(&self) -> usize {
        let slots: Vec<(String, Arc<Mutex<CameraSlot>>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut sessions = Vec::new();
        for (camera_id, slot) in slots {
            if let Some(session) = slot.lock().await.session.take() {
                sessions.push((camera_id, session));
            }
        }

        let count = sessions.len();
        if count > 0 {
            info!(count, "Stopping all transcoders");
        }

        futures::future::join_all(
            sessions
                .into_iter()
                .map(|(camera_id, session)| async move {
                    self.shutdown_session(&camera_id, session, "shutdown").await
                }),
        )
        .await;

        count
    }

    pub async fn is_running(&self, camera_id: &str) -> bool {
        let Some(slot) = self.existing_slot(camera_id).await else {
            return false;
        };
        let mut guard = slot.lock().await;
        match guard.session.as_mut() {
            Some(session) => matches!(session.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Sessions whose process is still alive
    pub async fn active_sessions(&self) -> Vec<SessionInfo> {
        let slots: Vec<(String, Arc<Mutex<CameraSlot>>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut sessions = Vec::new();
        for (camera_id, slot) in slots {
            let mut guard = slot.lock().await;
            if let Some(session) = guard.session.as_mut() {
                if matches!(session.child.try_wait(), Ok(None)) {
                    sessions.push(SessionInfo {
                        camera_id,
                        session_id: session.session_id.clone(),
                        pid: session.child.id(),
                        started_at: session.started_wall,
                        uptime_secs: session.started_at.elapsed().as_secs(),
                    });
                }
            }
        }
        sessions.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        sessions
    }

    async fn manifest_is_fresh(&self, manifest: &Path) -> bool {
        let Ok(metadata) = tokio::fs::metadata(manifest).await else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };

        // An mtime in the future counts as fresh
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age <= self.config.freshness_window())
            .unwrap_or(true)
    }

    /// Drop a session whose process has already exited
    async fn reap_exited(&self, camera_id: &str, slot: &mut CameraSlot) {
        let exited = match slot.session.as_mut() {
            Some(session) => !matches!(session.child.try_wait(), Ok(None)),
            None => false,
        };

        if exited {
            if let Some(session) = slot.session.take() {
                let reason = self
                    .record_failure(camera_id, slot, session, "Transcoder exited")
                    .await;
                info!(camera_id = %camera_id, %reason, "Reaped exited transcoder");
            }
        }
    }

    /// Retire a failed session: collect its diagnostics, remember them for
    /// every waiter of that session and publish the exit.
    ///
    /// Runs under the camera lock so concurrent waiters see the recorded
    /// failure rather than a vanished session.
    async fn record_failure(
        &self,
        camera_id: &str,
        slot: &mut CameraSlot,
        session: TranscodeSession,
        fallback: &str,
    ) -> String {
        drain_logs(session.log_task).await;
        let message = failure_message(&session.logs.snapshot(), fallback);

        slot.last_exit = Some(Instant::now());
        slot.last_failure = Some((session.session_id.clone(), message.clone()));

        let _ = self.event_bus.publish(StaywatchEvent::TranscoderExited {
            camera_id: camera_id.to_string(),
            session_id: session.session_id,
            reason: message.clone(),
        });

        message
    }

    async fn start_session(
        &self,
        camera_id: &str,
        binary: &Path,
        source_url: &Url,
        camera_dir: &Path,
        slot: &mut CameraSlot,
    ) -> Result<String, String> {
        if let Some(last_exit) = slot.last_exit {
            if last_exit.elapsed() < self.config.recent_exit_window() {
                let backoff = self.config.restart_backoff();
                info!(
                    camera_id = %camera_id,
                    backoff_ms = backoff.as_millis() as u64,
                    "Transcoder exited recently, backing off before restart"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        prepare_output_dir(camera_dir).await.map_err(|e| {
            error!(camera_id = %camera_id, dir = %camera_dir.display(), error = %e, "Cannot prepare output directory");
            format!("Cannot prepare output directory: {}", e)
        })?;

        let args = build_transcoder_args(source_url, camera_dir);
        let logs = Arc::new(LogBuffer::new(self.config.log_lines));

        info!(
            camera_id = %camera_id,
            source = %redact_credentials(source_url),
            binary = %binary.display(),
            "Starting transcoder"
        );

        let spawned = spawn_transcoder(binary, &args, camera_id, logs.clone()).map_err(|e| {
            error!(camera_id = %camera_id, error = %e, "Failed to spawn transcoder");
            format!("Failed to start transcoder: {}", e)
        })?;

        let session_id = Uuid::new_v4().to_string();
        let pid = spawned.child.id();
        slot.session = Some(TranscodeSession {
            session_id: session_id.clone(),
            child: spawned.child,
            log_task: spawned.log_task,
            logs,
            started_at: Instant::now(),
            started_wall: Utc::now(),
        });

        let _ = self.event_bus.publish(StaywatchEvent::TranscoderStarted {
            camera_id: camera_id.to_string(),
            session_id: session_id.clone(),
            pid,
        });

        Ok(session_id)
    }

    async fn wait_for_manifest(
        &self,
        camera_id: &str,
        slot: &Arc<Mutex<CameraSlot>>,
        session_id: &str,
        manifest: &Path,
    ) -> EnsureOutcome {
        let timeout = self.config.manifest_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            if manifest_exists(manifest).await {
                info!(camera_id = %camera_id, session_id = %session_id, "Playlist ready");
                return EnsureOutcome::ready();
            }

            let mut guard = slot.lock().await;
            let probe = match guard.session.as_mut() {
                Some(session) if session.session_id == session_id => {
                    match session.child.try_wait() {
                        Ok(None) => SessionProbe::Running,
                        Ok(Some(status)) => {
                            SessionProbe::Exited(format!("Transcoder exited with {}", status))
                        }
                        Err(e) => {
                            SessionProbe::Exited(format!("Transcoder status unavailable: {}", e))
                        }
                    }
                }
                _ => SessionProbe::Gone,
            };

            match probe {
                SessionProbe::Running => drop(guard),
                SessionProbe::Gone => {
                    let recorded = guard
                        .last_failure
                        .as_ref()
                        .filter(|(id, _)| id == session_id)
                        .map(|(_, message)| message.clone());
                    drop(guard);

                    if manifest_exists(manifest).await {
                        return EnsureOutcome::ready();
                    }
                    return EnsureOutcome::failed(recorded.unwrap_or_else(|| {
                        "Transcoder session ended before the stream was ready".to_string()
                    }));
                }
                SessionProbe::Exited(fallback) => {
                    let Some(session) = guard.session.take() else {
                        return EnsureOutcome::failed(fallback);
                    };
                    let message = self
                        .record_failure(camera_id, &mut guard, session, &fallback)
                        .await;
                    drop(guard);

                    warn!(camera_id = %camera_id, %message, "Transcoder exited before producing a playlist");
                    return EnsureOutcome::failed(message);
                }
            }

            if Instant::now() >= deadline {
                return self.abandon_session(camera_id, slot, session_id).await;
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Terminate a session that never produced a playlist
    async fn abandon_session(
        &self,
        camera_id: &str,
        slot: &Arc<Mutex<CameraSlot>>,
        session_id: &str,
    ) -> EnsureOutcome {
        let fallback = format!(
            "Timed out after {}s waiting for the stream",
            self.config.manifest_timeout().as_secs()
        );

        let mut guard = slot.lock().await;
        let owned = matches!(&guard.session, Some(s) if s.session_id == session_id);
        let session = if owned { guard.session.take() } else { None };

        let Some(mut session) = session else {
            // Another waiter already retired this session
            let recorded = guard
                .last_failure
                .as_ref()
                .filter(|(id, _)| id == session_id)
                .map(|(_, message)| message.clone());
            return EnsureOutcome::failed(recorded.unwrap_or(fallback));
        };

        warn!(camera_id = %camera_id, session_id = %session_id, "No playlist before timeout, terminating transcoder");
        terminate(&mut session.child, self.config.stop_grace()).await;

        let message = self
            .record_failure(camera_id, &mut guard, session, &fallback)
            .await;
        EnsureOutcome::failed(message)
    }

    async fn shutdown_session(&self, camera_id: &str, mut session: TranscodeSession, reason: &str) {
        info!(camera_id = %camera_id, session_id = %session.session_id, reason, "Stopping transcoder");
        terminate(&mut session.child, self.config.stop_grace()).await;
        drain_logs(session.log_task).await;
        let _ = self.event_bus.publish(StaywatchEvent::TranscoderExited {
            camera_id: camera_id.to_string(),
            session_id: session.session_id,
            reason: reason.to_string(),
        });
    }
}

async fn manifest_exists(manifest: &Path) -> bool {
    tokio::fs::try_exists(manifest).await.unwrap_or(false)
}

/// Create the camera directory and remove files left by a previous session
async fn prepare_output_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                debug!(path = %entry.path().display(), error = %e, "Failed to remove stale output");
            }
        }
    }

    Ok(())
}
