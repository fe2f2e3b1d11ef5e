use crate::error::{Result, StaywatchError, StreamError};
use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::Response,
};
use tracing::{debug, warn};

use super::server::ServerState;

/// Same-origin proxy to the external streaming gateway
pub async fn gateway_proxy_handler(
    State(state): State<ServerState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let gateway = state
        .services
        .resolver
        .gateway()
        .ok_or_else(|| StaywatchError::not_found("gateway is not configured"))?;

    if path.split('/').any(|segment| segment == "..") {
        return Err(StaywatchError::not_found(format!("gateway path {}", path)));
    }

    let mut upstream = gateway.clone();
    upstream.set_path(&format!("/{}", path.trim_start_matches('/')));
    upstream.set_query(query.as_deref());
    let _ = upstream.set_username("");
    let _ = upstream.set_password(None);

    debug!(path = %upstream.path(), "Proxying gateway request");

    let response = state
        .services
        .gateway_client
        .get(upstream.as_str())
        .send()
        .await
        .map_err(|e| {
            warn!(error = %e, "Gateway request failed");
            StreamError::Gateway {
                details: e.without_url().to_string(),
            }
        })?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let body = response.bytes().await.map_err(|e| StreamError::Gateway {
        details: e.without_url().to_string(),
    })?;

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .map_err(|e| StaywatchError::system(format!("Failed to build response: {}", e)))
}
