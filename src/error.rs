/// Unified error types for the Cipherpost server
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Validation errors (malformed addresses, bad form fields, bad config)
    #[error("Validation error: {0}")]
    Validation(String),

    /// One or more domains have no usable MX record. Fails the whole request.
    #[error("Host ({}) has no MX record", .0.join(","))]
    NoMxRecord(Vec<String>),

    /// A server-to-server call that breaks the federation contract.
    /// Distinct from per-address errors: the peer itself is broken or hostile.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Outbound call to a federated peer failed
    #[error("Federation error: {0}")]
    Federation(String),

    /// Signing or key handling errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert ServerError to HTTP response
impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            // Peers that break the protocol get no structured body
            ServerError::ProtocolViolation(ref reason) => {
                tracing::error!("Rejected federation request: {}", reason);
                return StatusCode::BAD_REQUEST.into_response();
            }
            ServerError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            ServerError::NoMxRecord(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "NoMxRecord",
                self.to_string(),
            ),
            ServerError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                self.to_string(),
            ),
            ServerError::Database(_)
            | ServerError::Internal(_)
            | ServerError::Io(_)
            | ServerError::Crypto(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
            ServerError::Federation(_) => (
                StatusCode::BAD_GATEWAY,
                "FederationError",
                self.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for server operations
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_mx_record_lists_every_host() {
        let err = ServerError::NoMxRecord(vec!["a.example".to_string(), "b.example".to_string()]);
        assert_eq!(err.to_string(), "Host (a.example,b.example) has no MX record");
    }

    #[test]
    fn test_protocol_violation_has_empty_body() {
        let response = ServerError::ProtocolViolation("two notaries".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get("content-type").is_none());
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let response = ServerError::Internal("secret path".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
