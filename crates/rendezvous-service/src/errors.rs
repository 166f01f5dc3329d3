//! Rendezvous service error types.
//!
//! Request-level errors map to HTTP status codes via the `IntoResponse` impl
//! and never terminate the process. Lifecycle errors (`ServerError`) are fatal
//! and are returned from `RendezvousServer::serve` after orderly release of
//! the subsystems that were already started.

use crate::subsystems::SubsystemError;
use crate::tls::TlsError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Request-level error type.
///
/// Maps to appropriate HTTP status codes:
/// - NotFound: 404 Not Found
/// - InvalidArgument: 400 Bad Request
/// - Serialization: 400 Bad Request
#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RendezvousError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            RendezvousError::NotFound(_) => 404,
            RendezvousError::InvalidArgument(_) | RendezvousError::Serialization(_) => 400,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RendezvousError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            RendezvousError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            RendezvousError::InvalidArgument(reason) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", reason.clone())
            }
            RendezvousError::Serialization(reason) => (
                StatusCode::BAD_REQUEST,
                "SERIALIZATION_ERROR",
                reason.clone(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Malformed JSON bodies surface as serialization errors rather than axum's
/// plain-text rejection.
impl From<JsonRejection> for RendezvousError {
    fn from(rejection: JsonRejection) -> Self {
        RendezvousError::Serialization(rejection.body_text())
    }
}

/// Fatal server lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Signaling or relay failed to bind or configure.
    #[error("Failed to start {subsystem} subsystem: {source}")]
    SubsystemStartup {
        subsystem: &'static str,
        #[source]
        source: SubsystemError,
    },

    /// The Discovery API certificate or key could not be loaded.
    #[error("Discovery TLS configuration error: {0}")]
    Tls(#[from] TlsError),

    /// The discovery listener failed to bind or stopped with an I/O error.
    #[error("Discovery transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A running subsystem reported a fatal fault.
    #[error("Subsystem fault, server stopped")]
    SubsystemFault,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    // Helper function to read the response body as JSON
    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_not_found() {
        let error = RendezvousError::NotFound("Group g-1 not found".to_string());
        assert_eq!(format!("{}", error), "Not found: Group g-1 not found");
    }

    #[test]
    fn test_display_invalid_argument() {
        let error = RendezvousError::InvalidArgument("Group appID not specified".to_string());
        assert_eq!(
            format!("{}", error),
            "Invalid argument: Group appID not specified"
        );
    }

    #[test]
    fn test_display_serialization() {
        let error = RendezvousError::Serialization("expected value".to_string());
        assert_eq!(format!("{}", error), "Serialization error: expected value");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RendezvousError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(
            RendezvousError::InvalidArgument("x".to_string()).status_code(),
            400
        );
        assert_eq!(
            RendezvousError::Serialization("x".to_string()).status_code(),
            400
        );
    }

    #[tokio::test]
    async fn test_into_response_not_found() {
        let response = RendezvousError::NotFound("Group g-1 not found".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "NOT_FOUND");
        assert_eq!(body_json["error"]["message"], "Group g-1 not found");
    }

    #[tokio::test]
    async fn test_into_response_invalid_argument() {
        let response =
            RendezvousError::InvalidArgument("Group appID not specified".to_string())
                .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_into_response_serialization() {
        let response = RendezvousError::Serialization("bad json".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "SERIALIZATION_ERROR");
        assert_eq!(body_json["error"]["message"], "bad json");
    }

    #[test]
    fn test_server_error_display_names_subsystem() {
        let error = ServerError::SubsystemStartup {
            subsystem: "relay",
            source: SubsystemError::InvalidAddress("no-port".to_string()),
        };
        assert_eq!(
            format!("{}", error),
            "Failed to start relay subsystem: Invalid address: no-port"
        );
    }
}
