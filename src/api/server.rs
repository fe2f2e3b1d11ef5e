use crate::{
    app::Services,
    config::ServerConfig,
    error::{Result, StaywatchError, StreamError},
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{
    camera_health_handler, health_handler, hls_handler, release_locker_handler,
    stop_stream_handler, stream_url_handler,
};
use super::proxy::gateway_proxy_handler;

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) services: Arc<Services>,
}

/// Build the full HTTP router over a service registry
pub fn build_router(services: Arc<Services>) -> Router {
    let proxy_route = format!(
        "{}/*path",
        services.config.gateway.proxy_prefix.trim_end_matches('/')
    );

    let state = ServerState { services };

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/cameras/:camera_id/stream",
            get(stream_url_handler).delete(stop_stream_handler),
        )
        .route("/api/cameras/:camera_id/health", get(camera_health_handler))
        .route("/api/cameras/:camera_id/hls/*path", get(hls_handler))
        .route(
            "/api/properties/:property_id/lockers/:locker/release",
            post(release_locker_handler),
        )
        .route(&proxy_route, get(gateway_proxy_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP API server for playback, device health and locker release
pub struct ApiServer {
    pub(crate) config: ServerConfig,
    pub(crate) services: Arc<Services>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, services: Arc<Services>) -> Self {
        Self { config, services }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| StreamError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        info!("API server listening on {}", addr);
        Ok(listener)
    }

    /// Serve requests on `listener` until `shutdown` is cancelled
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let app = build_router(self.services.clone());

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| StreamError::StartupFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("API server stopped");
        Ok(())
    }
}

/// Builder for [`ApiServer`]
#[derive(Default)]
pub struct ApiServerBuilder {
    config: Option<ServerConfig>,
    services: Option<Arc<Services>>,
}

impl ApiServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the service registry
    pub fn services(mut self, services: Arc<Services>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn build(self) -> Result<ApiServer> {
        let services = self.services.ok_or_else(|| {
            StaywatchError::Stream(StreamError::StartupFailed {
                details: "Service registry is required".to_string(),
            })
        })?;

        let config = self
            .config
            .unwrap_or_else(|| services.config.server.clone());

        Ok(ApiServer::new(config, services))
    }
}
