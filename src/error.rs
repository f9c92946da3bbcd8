//! Error types for wsgate
//!
//! This module defines the crate-wide error enum and provides the mapping to
//! HTTP status codes and JSON error bodies used by every endpoint. All error
//! responses carry `Content-Type: application/json` and a body of the form
//! `{"message": "<text>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias for wsgate operations
pub type Result<T> = std::result::Result<T, WsGateError>;

/// Main error type for wsgate
#[derive(Debug, Error)]
pub enum WsGateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    RequestValidation(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Not authorised: {0}")]
    Authorisation(String),

    #[error("OpenID Connect provider error: {0}")]
    OpenIdConnect(String),

    #[error("Connection limit reached for session {0}")]
    InstanceLimitReached(String),

    #[error("Wrong client kind for session {0}")]
    InstanceTypeForSessionIncorrect(String),

    #[error("Session operation did not complete: {0}")]
    IncompleteOp(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Server is shutting down")]
    ShuttingDown,
}

impl WsGateError {
    /// Shorthand for a configuration error with a formatted message
    pub fn config_msg(msg: impl Into<String>) -> Self {
        WsGateError::Config(msg.into())
    }

    /// Shorthand for a request validation error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        WsGateError::RequestValidation(msg.into())
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            WsGateError::RequestValidation(_)
            | WsGateError::TopicNotFound(_)
            | WsGateError::InstanceTypeForSessionIncorrect(_)
            | WsGateError::Codec(_) => StatusCode::BAD_REQUEST,
            WsGateError::Authentication(_)
            | WsGateError::InvalidToken(_)
            | WsGateError::InvalidPublicKey(_) => StatusCode::UNAUTHORIZED,
            WsGateError::Authorisation(_) => StatusCode::FORBIDDEN,
            WsGateError::InstanceLimitReached(_) => StatusCode::CONFLICT,
            WsGateError::OpenIdConnect(_) => StatusCode::SERVICE_UNAVAILABLE,
            WsGateError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Render the standard JSON error body for a message.
pub fn error_body(message: &str) -> String {
    serde_json::json!({ "message": message }).to_string()
}

impl IntoResponse for WsGateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = error_body(&self.to_string());
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            WsGateError::RequestValidation("missing clientId".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WsGateError::TopicNotFound("orders".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WsGateError::Authentication("no credentials".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WsGateError::Authorisation("not allowed".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WsGateError::InstanceLimitReached("g1".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            WsGateError::OpenIdConnect("provider unreachable".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            WsGateError::Server("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_shape() {
        let body = error_body("topic 'x' does not exist");
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["message"], "topic 'x' does not exist");
    }
}
