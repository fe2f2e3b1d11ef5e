//! Maps a camera's configured source address to the URL handed to clients.
//!
//! Native RTSP sources are never exposed: clients get the local playlist path
//! served by the transcoding supervisor. Addresses on the external gateway are
//! rewritten onto the same-origin proxy path, playlist URLs pass through with
//! any userinfo removed.

use url::Url;

/// File name of the playlist written by the transcoder
pub const MANIFEST_FILE: &str = "index.m3u8";

/// Schemes that need the local transcoder
pub const LIVE_TRANSPORT_SCHEMES: &[&str] = &["rtsp", "rtsps"];

pub fn is_live_transport(url: &Url) -> bool {
    LIVE_TRANSPORT_SCHEMES.contains(&url.scheme())
}

/// Local playlist path for a camera
pub fn local_playback_path(camera_id: &str) -> String {
    format!(
        "/api/cameras/{}/hls/{}",
        urlencoding::encode(camera_id),
        MANIFEST_FILE
    )
}

/// Rebuild `url` without its userinfo component
pub fn redact_credentials(url: &Url) -> String {
    let mut out = format!("{}://", url.scheme());
    if let Some(host) = url.host_str() {
        out.push_str(host);
    }
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path());
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

#[derive(Debug, Clone)]
pub struct StreamUrlResolver {
    gateway: Option<Url>,
    proxy_prefix: String,
}

impl StreamUrlResolver {
    /// `gateway_base` is the external gateway's base URL, `proxy_prefix` the
    /// same-origin path it is mounted under (e.g. `/gateway`).
    pub fn new(gateway_base: Option<&str>, proxy_prefix: impl Into<String>) -> Self {
        let gateway = gateway_base
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .and_then(|base| match Url::parse(base) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(gateway = %base, error = %e, "Ignoring unparseable gateway URL");
                    None
                }
            });

        let proxy_prefix = proxy_prefix.into().trim_end_matches('/').to_string();

        Self {
            gateway,
            proxy_prefix,
        }
    }

    pub fn gateway(&self) -> Option<&Url> {
        self.gateway.as_ref()
    }

    pub fn proxy_prefix(&self) -> &str {
        &self.proxy_prefix
    }

    /// Client-facing URL for a camera's source address
    pub fn resolve(&self, source: &str, camera_id: &str) -> String {
        let parsed = match Url::parse(source.trim()) {
            Ok(url) => url,
            Err(_) => return local_playback_path(camera_id),
        };

        if is_live_transport(&parsed) {
            return local_playback_path(camera_id);
        }

        if self.is_gateway_address(&parsed) {
            return self.proxy_path(&parsed);
        }

        if parsed.path().to_ascii_lowercase().ends_with(".m3u8") {
            return redact_credentials(&parsed);
        }

        local_playback_path(camera_id)
    }

    fn is_gateway_address(&self, url: &Url) -> bool {
        match &self.gateway {
            Some(gateway) => {
                gateway.host_str().is_some()
                    && url.host_str() == gateway.host_str()
                    && url.port_or_known_default() == gateway.port_or_known_default()
            }
            None => false,
        }
    }

    fn proxy_path(&self, url: &Url) -> String {
        let mut path = format!("{}{}", self.proxy_prefix, url.path());
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        path
    }
}
