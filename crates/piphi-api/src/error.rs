//! API error types and conversions

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use piphi_core::EngineError;
use serde::Serialize;

/// API error type that converts to HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400 Bad Request
    #[error("{0}")]
    BadRequest(String),
    /// 404 Not Found
    #[error("{0}")]
    NotFound(String),
    /// 502 Bad Gateway (publish capability failure)
    #[error("{0}")]
    BadGateway(String),
    /// 500 Internal Server Error
    #[error("{0}")]
    Internal(String),
}

/// Standard error response format
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        if status.is_server_error() {
            tracing::error!(error = error_type, %message, "API error");
        } else {
            tracing::debug!(error = error_type, %message, "API client error");
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            // every activation failure reads as an unsupported sensor to the caller
            EngineError::SensorNotFound(detail)
            | EngineError::SensorUnsupported(detail)
            | EngineError::SensorUnavailable(detail)
            | EngineError::Transport(detail) => {
                ApiError::NotFound(format!("Sensor not supported: {detail}"))
            }
            EngineError::InvalidConfig(msg) => ApiError::BadRequest(msg),
            EngineError::Publish(msg) => ApiError::BadGateway(msg),
            EngineError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_failures_are_not_found() {
        let err = ApiError::from(EngineError::SensorUnavailable("/dev/ttyACM0".into()));
        assert!(matches!(
            &err,
            ApiError::NotFound(msg) if msg == "Sensor not supported: /dev/ttyACM0"
        ));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_codes_follow_engine_mapping() {
        let cases = [
            EngineError::SensorNotFound("x".into()),
            EngineError::Transport("x".into()),
            EngineError::InvalidConfig("x".into()),
            EngineError::Publish("x".into()),
            EngineError::Internal("x".into()),
        ];
        for err in cases {
            let expected = err.status_code();
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status().as_u16(), expected);
        }
    }
}
