//! Error types for archive-history's HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::backend::BackendError;
use crate::history::HistoryError;
use crate::lifecycle::LifecycleError;
use crate::streaming::StreamError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Path outside the archive (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Upload over the transport message limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Backend call failed; message is the backend's own (502)
    #[error("{0}")]
    BadGateway(String),

    /// Request timed out waiting for the backend (504)
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// archive-common error
    #[error("Common error: {0}")]
    Common(#[from] archive_common::Error),
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        let message = err.to_string();
        match err {
            HistoryError::Unresolved | HistoryError::InvalidRecordName(_) => {
                ApiError::BadRequest(message)
            }
            HistoryError::NoReport(_) | HistoryError::Backend(BackendError::PathNotFound(_)) => {
                ApiError::NotFound(message)
            }
            HistoryError::OutsideArchive(_) => ApiError::Forbidden(message),
            HistoryError::ReportUnavailable(_) | HistoryError::Backend(_) => {
                ApiError::BadGateway(message)
            }
            HistoryError::Stream(e) => e.into(),
            HistoryError::Lifecycle(e) => e.into(),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        let message = err.to_string();
        match err {
            StreamError::PayloadTooLarge { .. } => ApiError::PayloadTooLarge(message),
            StreamError::TimedOut => ApiError::Timeout(message),
            StreamError::Failed { .. } | StreamError::Backend(_) => ApiError::BadGateway(message),
            StreamError::Cancelled | StreamError::Abandoned | StreamError::Decode { .. } => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        let message = err.to_string();
        match err {
            LifecycleError::InvalidYear
            | LifecycleError::MissingName
            | LifecycleError::UnusableName(_)
            | LifecycleError::NotConfirmed { .. }
            | LifecycleError::InvalidRecordName(_) => ApiError::BadRequest(message),
            LifecycleError::StepFailed { .. } | LifecycleError::DeleteFailed(_) => {
                ApiError::BadGateway(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "BACKEND_ERROR", msg),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(ref err) => {
                let status = match err {
                    archive_common::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    archive_common::Error::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, "COMMON_ERROR", err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_failure_keeps_backend_message() {
        let err: ApiError = LifecycleError::DeleteFailed("Path not found".to_string()).into();
        assert!(matches!(err, ApiError::BadGateway(ref m) if m == "Path not found"));
    }

    #[test]
    fn test_status_mapping() {
        let err: ApiError = HistoryError::OutsideArchive("/etc".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);

        let err: ApiError = StreamError::PayloadTooLarge {
            encoded_len: 10,
            limit: 5,
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::PAYLOAD_TOO_LARGE);

        let err: ApiError = HistoryError::Unresolved.into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err: ApiError = HistoryError::Backend(BackendError::PathNotFound("/gone".into())).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
