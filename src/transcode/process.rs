use super::diagnostics::redact_userinfo;
use crate::models::Credentials;
use crate::resolver::{is_live_transport, redact_credentials, MANIFEST_FILE};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use url::Url;

/// Segment length in seconds
pub const SEGMENT_SECONDS: u32 = 2;

/// Number of segments kept in the rolling playlist
pub const PLAYLIST_WINDOW: u32 = 5;

/// Bounded buffer holding the most recent diagnostic lines of a transcoder
#[derive(Debug)]
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

/// Locate an executable: explicit paths must exist, bare names are searched on PATH
pub fn find_executable(binary: &str) -> Option<PathBuf> {
    let binary = binary.trim();
    if binary.is_empty() {
        return None;
    }

    if binary.contains(std::path::MAIN_SEPARATOR) || binary.contains('/') {
        let path = PathBuf::from(binary);
        return path.is_file().then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Validate the source protocol and merge configured credentials into it.
///
/// Error messages never include the source's userinfo.
pub fn authenticated_source(
    source: &str,
    credentials: Option<&Credentials>,
) -> Result<Url, String> {
    let mut url = Url::parse(source.trim())
        .map_err(|e| format!("Invalid stream source address: {}", e))?;

    if !is_live_transport(&url) {
        return Err(format!(
            "Unsupported stream source {}: only rtsp:// and rtsps:// sources can be transcoded",
            redact_credentials(&url)
        ));
    }

    if url.host_str().is_none() {
        return Err("Stream source address has no host".to_string());
    }

    if let Some(creds) = credentials {
        if url.username().is_empty() && !creds.username.is_empty() {
            url.set_username(&creds.username)
                .map_err(|_| "Cannot apply credentials to stream source".to_string())?;
            if !creds.password.is_empty() {
                url.set_password(Some(&creds.password))
                    .map_err(|_| "Cannot apply credentials to stream source".to_string())?;
            }
        }
    }

    Ok(url)
}

/// Transcoder arguments for low-latency HLS output into `output_dir`
pub fn build_transcoder_args(source: &Url, output_dir: &Path) -> Vec<String> {
    let segment_pattern = output_dir.join("segment_%05d.ts");
    let manifest = output_dir.join(MANIFEST_FILE);

    vec![
        "-nostdin".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        // TCP interleaving survives lossy networks and NAT
        "-rtsp_transport".to_string(),
        "tcp".to_string(),
        // Slow-opening cameras need a long probe
        "-analyzeduration".to_string(),
        "10000000".to_string(),
        "-probesize".to_string(),
        "10000000".to_string(),
        "-i".to_string(),
        source.to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        SEGMENT_SECONDS.to_string(),
        "-hls_list_size".to_string(),
        PLAYLIST_WINDOW.to_string(),
        "-hls_flags".to_string(),
        "delete_segments+omit_endlist".to_string(),
        "-hls_segment_filename".to_string(),
        segment_pattern.to_string_lossy().to_string(),
        manifest.to_string_lossy().to_string(),
    ]
}

/// Spawned transcoder plus the task draining its diagnostic output
pub struct SpawnedTranscoder {
    pub child: Child,
    pub log_task: Option<JoinHandle<()>>,
}

pub fn spawn_transcoder(
    binary: &Path,
    args: &[String],
    camera_id: &str,
    logs: Arc<LogBuffer>,
) -> std::io::Result<SpawnedTranscoder> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let log_task = child.stderr.take().map(|stderr| {
        let camera_id = camera_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        // The source URL carries credentials and ffmpeg echoes it back
                        let line = redact_userinfo(&line);
                        trace!(camera_id = %camera_id, "[transcoder] {}", line);
                        logs.push(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(camera_id = %camera_id, error = %e, "Transcoder log stream closed");
                        break;
                    }
                }
            }
        })
    });

    Ok(SpawnedTranscoder { child, log_task })
}

/// Wait for the log drain task so the final lines of an exited process are captured
pub async fn drain_logs(log_task: Option<JoinHandle<()>>) {
    if let Some(task) = log_task {
        let _ = timeout(Duration::from_millis(500), task).await;
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL
pub async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 {
                match timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        debug!(pid, status = %status, "Transcoder exited after SIGTERM");
                        return;
                    }
                    Ok(Err(e)) => warn!(pid, error = %e, "Failed waiting for transcoder"),
                    Err(_) => warn!(pid, grace_secs = grace.as_secs_f64(), "Transcoder ignored SIGTERM, killing"),
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Transcoder kill failed (already exited?)");
    }
}
