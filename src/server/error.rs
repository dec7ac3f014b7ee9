//! HTTP bridge for the engine error taxonomy.
//!
//! Wraps [`EngineError`] values into responses with a stable `code` tag and
//! a human-readable message, implementing Axum's `IntoResponse`.

use crate::error::EngineError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;

/// Application error returned by web handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    retry_after: Option<u64>,
}

impl AppError {
    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_input".into(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthenticated".into(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "dependency_unavailable".into(),
            message: message.into(),
            retry_after: None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::Unauthenticated => StatusCode::UNAUTHORIZED,
            EngineError::Unauthorized(_) | EngineError::ConsentRequired => StatusCode::FORBIDDEN,
            EngineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::InvalidInput(_) | EngineError::InvalidGeometry(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let retry_after = match &err {
            EngineError::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };
        Self {
            status,
            code: err.kind().to_string(),
            message: err.to_string(),
            retry_after,
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                "Request failed"
            );
        }

        let retry_after = self.retry_after;
        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            retry_after_secs: retry_after,
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn engine_errors_map_to_documented_statuses() {
        let cases = [
            (EngineError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (EngineError::ConsentRequired, StatusCode::FORBIDDEN),
            (
                EngineError::RateLimited {
                    retry_after: Duration::from_secs(30),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                EngineError::InvalidInput("lat".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::InvalidGeometry("ring".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::NotFound("zone".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::DependencyUnavailable("redis".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, status);
        }
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let app: AppError = EngineError::RateLimited {
            retry_after: Duration::from_secs(42),
        }
        .into();
        assert_eq!(app.retry_after, Some(42));
    }
}
