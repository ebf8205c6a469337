//! Error types for the gateway.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use llm_gateway_common::{ErrorBody, ErrorKind, ErrorResponse, ValidationError};

/// Errors surfaced by adapters, the stream relay and the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Backend error: {message}")]
    Backend {
        status: Option<u16>,
        message: String,
    },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl Error {
    pub fn backend(message: impl Into<String>) -> Self {
        Error::Backend {
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::BackendUnreachable(_) => ErrorKind::BackendUnreachable,
            Error::Backend { .. } => ErrorKind::BackendError,
            Error::StreamInterrupted(_) => ErrorKind::StreamInterrupted,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let backend_status = match self {
            Error::Backend { status, .. } => *status,
            _ => None,
        };
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            backend_status,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::BackendUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Backend { .. } => StatusCode::BAD_GATEWAY,
            Error::StreamInterrupted(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::InvalidRequest(e.to_string())
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidRequest(rejection.body_text())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Error::BackendUnreachable(e.to_string())
        } else if e.is_timeout() {
            Error::backend(format!("backend timed out: {}", e))
        } else if e.is_decode() {
            Error::backend(format!("malformed backend payload: {}", e))
        } else {
            Error::Backend {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.to_body(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            Error::InvalidRequest("x".into()).kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            Error::BackendUnreachable("x".into()).kind(),
            ErrorKind::BackendUnreachable
        );
        assert_eq!(Error::backend("x").kind(), ErrorKind::BackendError);
        assert_eq!(
            Error::StreamInterrupted("x".into()).kind(),
            ErrorKind::StreamInterrupted
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::InvalidRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::BackendUnreachable("x".into()).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::backend("x").into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_body_forwards_backend_status() {
        let err = Error::Backend {
            status: Some(404),
            message: "model 'nope' not found".to_string(),
        };
        let body = err.to_body();
        assert_eq!(body.kind, ErrorKind::BackendError);
        assert_eq!(body.backend_status, Some(404));
        assert!(body.message.contains("model 'nope' not found"));
    }

    #[test]
    fn test_validation_error_maps_to_invalid_request() {
        let err: Error = ValidationError::EmptyMessages.into();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(err.to_string(), "Invalid request: messages must not be empty");
    }
}
