use crate::error::{Result, StaywatchError};
use crate::models::Camera;
use crate::transcode::{find_executable, validate_camera_id};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::server::ServerState;

async fn load_camera(state: &ServerState, camera_id: &str) -> Result<Camera> {
    state
        .services
        .cameras
        .get_camera(camera_id)
        .await?
        .ok_or_else(|| StaywatchError::not_found(format!("camera {}", camera_id)))
}

/// Handler for service health endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let services = &state.services;
    let sessions = services.supervisor.active_sessions().await;
    let binary = &services.config.transcoder.binary;

    let health_info = json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "transcoder": {
            "binary": binary,
            "available": find_executable(binary).is_some(),
            "sessions": sessions,
        },
        "bridge": {
            "configured": services.bridge.is_configured(),
            "breaker": services.bridge_breaker.snapshot(),
        },
        "gateway": {
            "configured": services.resolver.gateway().is_some(),
            "proxy_prefix": services.resolver.proxy_prefix(),
        },
        "server_info": {
            "subscribers": services.event_bus.subscriber_count(),
        }
    });

    (StatusCode::OK, Json(health_info))
}

/// Client-safe playback URL for a camera
pub async fn stream_url_handler(
    State(state): State<ServerState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse> {
    let camera = load_camera(&state, &camera_id).await?;

    let source = camera
        .playback_url
        .as_deref()
        .or(camera.stream_url.as_deref())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            StaywatchError::not_found(format!("stream source for camera {}", camera_id))
        })?;

    let url = state.services.resolver.resolve(source, &camera.id);
    debug!(camera_id = %camera.id, %url, "Resolved playback URL");

    Ok(Json(json!({
        "camera_id": camera.id,
        "url": url,
    })))
}

/// Serve a playlist or segment, starting the camera's transcoder on demand
pub async fn hls_handler(
    State(state): State<ServerState>,
    Path((camera_id, path)): Path<(String, String)>,
) -> Result<Response> {
    validate_camera_id(&camera_id)?;
    let camera = load_camera(&state, &camera_id).await?;

    let source = camera
        .stream_url
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            StaywatchError::not_found(format!("stream source for camera {}", camera_id))
        })?;

    let outcome = state
        .services
        .supervisor
        .ensure_running(&camera.id, source, camera.credentials.as_ref())
        .await;

    if !outcome.ready {
        return Ok((StatusCode::SERVICE_UNAVAILABLE, Json(outcome)).into_response());
    }

    let file = state.services.supervisor.serve_segment(&camera.id, &path).await?;
    let data = tokio::fs::read(&file.path).await?;

    let cache_control = if file.is_playlist() {
        "no-cache, no-store"
    } else {
        "max-age=60"
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, file.media_type)
        .header(header::CACHE_CONTROL, cache_control)
        .body(Body::from(data))
        .map_err(|e| StaywatchError::system(format!("Failed to build response: {}", e)))?)
}

/// Stop a camera's transcoder
pub async fn stop_stream_handler(
    State(state): State<ServerState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse> {
    validate_camera_id(&camera_id)?;
    let stopped = state.services.supervisor.stop(&camera_id).await;
    info!(camera_id = %camera_id, stopped, "Stream stop requested");

    Ok(Json(json!({
        "camera_id": camera_id,
        "stopped": stopped,
    })))
}

/// Last recorded liveness and diagnostics for a camera
pub async fn camera_health_handler(
    State(state): State<ServerState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse> {
    let camera = load_camera(&state, &camera_id).await?;
    let record = state.services.cameras.get_health(&camera_id).await?;

    Ok(Json(json!({
        "camera_id": camera.id,
        "status": camera.status,
        "health": record,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseBody {
    pub requested_by: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Release a locker through the hardware bridge
pub async fn release_locker_handler(
    State(state): State<ServerState>,
    Path((property_id, locker)): Path<(String, String)>,
    Json(body): Json<ReleaseBody>,
) -> Result<impl IntoResponse> {
    if body.requested_by.trim().is_empty() {
        return Err(StaywatchError::Validation(
            "requested_by must not be empty".to_string(),
        ));
    }

    let outcome = state
        .services
        .bridge
        .release_locker(
            &property_id,
            &locker,
            body.requested_by.trim(),
            body.reason.as_deref(),
        )
        .await?;

    Ok(Json(outcome))
}
