use crate::models::{Camera, Locker};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Top-level path segments served by the API router itself
const RESERVED_ROUTE_ROOTS: &[&str] = &["api", "health"];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StaywatchConfig {
    pub server: ServerConfig,
    pub transcoder: TranscoderConfig,
    pub gateway: GatewayConfig,
    pub poller: PollerConfig,
    pub bridge: BridgeConfig,

    /// Cameras served by the bundled in-memory repository
    #[serde(default)]
    pub cameras: Vec<Camera>,

    /// Lockers served by the bundled in-memory directory
    #[serde(default)]
    pub lockers: Vec<Locker>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TranscoderConfig {
    /// Transcoder executable, either a bare name searched on PATH or a full path
    #[serde(default = "default_transcoder_binary")]
    pub binary: String,

    /// Root directory for per-camera playlist output
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// How long to wait for the first manifest before giving up
    #[serde(default = "default_manifest_timeout_secs")]
    pub manifest_timeout_secs: u64,

    /// Sleep before respawning a camera whose transcoder exited recently
    #[serde(default = "default_restart_backoff_secs")]
    pub restart_backoff_secs: u64,

    /// An exit younger than this triggers the restart backoff
    #[serde(default = "default_recent_exit_window_secs")]
    pub recent_exit_window_secs: u64,

    /// A manifest modified within this window counts as a live stream
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,

    /// Manifest polling interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Number of diagnostic output lines retained per session
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatewayConfig {
    /// Base URL of the external streaming gateway, if one is deployed
    pub base_url: Option<String>,

    /// Same-origin path prefix under which the gateway is proxied
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: String,

    /// Upstream timeout for proxied requests
    #[serde(default = "default_gateway_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollerConfig {
    /// Run the background health poller
    #[serde(default = "default_poller_enabled")]
    pub enabled: bool,

    /// Sleep between liveness iterations
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,

    /// Minimum age of diagnostics before they are recomputed
    #[serde(default = "default_diagnostics_interval_secs")]
    pub diagnostics_interval_secs: u64,

    /// TCP connect timeout used by the diagnostics probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Prefix for last-known still image references
    #[serde(default = "default_snapshot_root")]
    pub snapshot_root: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BridgeConfig {
    /// Locker release endpoint; absent means the feature is disabled
    pub url: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_bridge_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time since the last failure before a trial call is allowed
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

impl TranscoderConfig {
    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }

    pub fn recent_exit_window(&self) -> Duration {
        Duration::from_secs(self.recent_exit_window_secs)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PollerConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn diagnostics_interval(&self) -> Duration {
        Duration::from_secs(self.diagnostics_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl BridgeConfig {
    /// Configured endpoint, treating a blank value as absent
    pub fn endpoint(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

impl StaywatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("staywatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            .set_default("transcoder.binary", default_transcoder_binary())?
            .set_default(
                "transcoder.output_root",
                default_output_root().to_string_lossy().to_string(),
            )?
            .set_default(
                "transcoder.manifest_timeout_secs",
                default_manifest_timeout_secs() as i64,
            )?
            .set_default(
                "transcoder.restart_backoff_secs",
                default_restart_backoff_secs() as i64,
            )?
            .set_default(
                "transcoder.recent_exit_window_secs",
                default_recent_exit_window_secs() as i64,
            )?
            .set_default(
                "transcoder.freshness_window_secs",
                default_freshness_window_secs() as i64,
            )?
            .set_default("transcoder.poll_interval_ms", default_poll_interval_ms() as i64)?
            .set_default("transcoder.stop_grace_secs", default_stop_grace_secs() as i64)?
            .set_default("transcoder.log_lines", default_log_lines() as i64)?
            .set_default("gateway.proxy_prefix", default_proxy_prefix())?
            .set_default(
                "gateway.request_timeout_secs",
                default_gateway_timeout_secs() as i64,
            )?
            .set_default("poller.enabled", default_poller_enabled())?
            .set_default(
                "poller.liveness_interval_secs",
                default_liveness_interval_secs() as i64,
            )?
            .set_default(
                "poller.diagnostics_interval_secs",
                default_diagnostics_interval_secs() as i64,
            )?
            .set_default("poller.probe_timeout_ms", default_probe_timeout_ms() as i64)?
            .set_default("poller.snapshot_root", default_snapshot_root())?
            .set_default(
                "bridge.request_timeout_secs",
                default_bridge_timeout_secs() as i64,
            )?
            .set_default("bridge.failure_threshold", default_failure_threshold())?
            .set_default(
                "bridge.recovery_timeout_secs",
                default_recovery_timeout_secs() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. STAYWATCH_BRIDGE__URL
            .add_source(Environment::with_prefix("STAYWATCH").separator("__"))
            .build()?;

        let config: StaywatchConfig = settings.try_deserialize()?;

        info!(
            cameras = config.cameras.len(),
            lockers = config.lockers.len(),
            "Configuration loaded successfully"
        );
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if self.transcoder.binary.trim().is_empty() {
            return Err(ConfigError::Message(
                "Transcoder binary must not be empty".to_string(),
            ));
        }

        if self.transcoder.manifest_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Transcoder manifest_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.transcoder.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Transcoder poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.poller.liveness_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Poller liveness_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.poller.diagnostics_interval_secs < self.poller.liveness_interval_secs {
            return Err(ConfigError::Message(
                "Poller diagnostics_interval_secs must not be shorter than liveness_interval_secs"
                    .to_string(),
            ));
        }

        if self.bridge.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "Bridge failure_threshold must be greater than 0".to_string(),
            ));
        }

        let prefix = self.gateway.proxy_prefix.trim_end_matches('/');
        let root = prefix.trim_start_matches('/').split('/').next().unwrap_or("");
        if !prefix.starts_with('/')
            || root.is_empty()
            || prefix.contains("//")
            || prefix.contains([':', '*'])
        {
            return Err(ConfigError::Message(
                "Gateway proxy_prefix must be an absolute path such as /gateway".to_string(),
            ));
        }
        if RESERVED_ROUTE_ROOTS.contains(&root) {
            return Err(ConfigError::Message(format!(
                "Gateway proxy_prefix {} overlaps the API routes under /{}",
                self.gateway.proxy_prefix, root
            )));
        }

        for (name, value) in [
            ("gateway.base_url", self.gateway.base_url.as_deref()),
            ("bridge.url", self.bridge.endpoint()),
        ] {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                url::Url::parse(value).map_err(|e| {
                    ConfigError::Message(format!("{} is not a valid URL ({}): {}", name, value, e))
                })?;
            }
        }

        Ok(())
    }
}

impl Default for StaywatchConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
            },
            transcoder: TranscoderConfig {
                binary: default_transcoder_binary(),
                output_root: default_output_root(),
                manifest_timeout_secs: default_manifest_timeout_secs(),
                restart_backoff_secs: default_restart_backoff_secs(),
                recent_exit_window_secs: default_recent_exit_window_secs(),
                freshness_window_secs: default_freshness_window_secs(),
                poll_interval_ms: default_poll_interval_ms(),
                stop_grace_secs: default_stop_grace_secs(),
                log_lines: default_log_lines(),
            },
            gateway: GatewayConfig {
                base_url: None,
                proxy_prefix: default_proxy_prefix(),
                request_timeout_secs: default_gateway_timeout_secs(),
            },
            poller: PollerConfig {
                enabled: default_poller_enabled(),
                liveness_interval_secs: default_liveness_interval_secs(),
                diagnostics_interval_secs: default_diagnostics_interval_secs(),
                probe_timeout_ms: default_probe_timeout_ms(),
                snapshot_root: default_snapshot_root(),
            },
            bridge: BridgeConfig {
                url: None,
                request_timeout_secs: default_bridge_timeout_secs(),
                failure_threshold: default_failure_threshold(),
                recovery_timeout_secs: default_recovery_timeout_secs(),
            },
            cameras: Vec::new(),
            lockers: Vec::new(),
        }
    }
}

// Default value functions
fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8080
}

fn default_transcoder_binary() -> String {
    "ffmpeg".to_string()
}
fn default_output_root() -> PathBuf {
    PathBuf::from("./hls")
}
fn default_manifest_timeout_secs() -> u64 {
    20
}
fn default_restart_backoff_secs() -> u64 {
    3
}
fn default_recent_exit_window_secs() -> u64 {
    10
}
fn default_freshness_window_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_stop_grace_secs() -> u64 {
    5
}
fn default_log_lines() -> usize {
    50
}

fn default_proxy_prefix() -> String {
    "/gateway".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_poller_enabled() -> bool {
    true
}
fn default_liveness_interval_secs() -> u64 {
    30
}
fn default_diagnostics_interval_secs() -> u64 {
    300
}
fn default_probe_timeout_ms() -> u64 {
    2000
}
fn default_snapshot_root() -> String {
    "snapshots".to_string()
}

fn default_bridge_timeout_secs() -> u64 {
    5
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_recovery_timeout_secs() -> u64 {
    30
}
