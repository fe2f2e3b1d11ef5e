use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StaywatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Errors raised by the live video path (supervisor, segment serving, HTTP server)
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid camera identifier: {camera_id}")]
    InvalidCameraId { camera_id: String },

    #[error("Segment not found: {path}")]
    SegmentNotFound { path: String },

    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server startup failed: {details}")]
    StartupFailed { details: String },

    #[error("Gateway proxy failed: {details}")]
    Gateway { details: String },
}

/// Errors from the hardware bridge transport; always folded into a release outcome
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Bridge returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },
}

impl StaywatchError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound(what.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Stream(StreamError::InvalidCameraId { .. })
            | Self::Stream(StreamError::SegmentNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            Self::Stream(StreamError::Gateway { .. }) | Self::Http(_) | Self::Bridge(_) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for StaywatchError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, error_code, message = %message, "Request error");
        } else {
            tracing::debug!(status = %status, error_code, message = %message, "Request rejected");
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, StaywatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = StaywatchError::not_found("locker 12");
        assert_eq!(err.status_and_code().0, StatusCode::NOT_FOUND);

        let err = StaywatchError::Stream(StreamError::SegmentNotFound {
            path: "../x".to_string(),
        });
        assert_eq!(err.status_and_code().0, StatusCode::NOT_FOUND);

        let err = StaywatchError::system("boom");
        assert_eq!(err.status_and_code().0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_component_error_display() {
        let err = StaywatchError::component("poller", "camera list unavailable");
        assert_eq!(
            err.to_string(),
            "Component error in poller: camera list unavailable"
        );
    }
}
