use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::DocumentStatus;

#[derive(Error, Debug)]
pub enum FakturoError {
    #[error("Database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Engine timed out after {timeout_ms} ms: {engine}")]
    EngineTimeout { engine: String, timeout_ms: u64 },

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Downstream error: {0}")]
    Downstream(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl FakturoError {
    /// Transient failures are retried by the scheduler; everything else is final for the cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FakturoError::EngineUnavailable(_)
                | FakturoError::EngineTimeout { .. }
                | FakturoError::Engine(_)
                | FakturoError::Http(_)
        )
    }
}

impl IntoResponse for FakturoError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            FakturoError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            FakturoError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            FakturoError::Json(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            FakturoError::UrlParse(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            FakturoError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            FakturoError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            FakturoError::EngineUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            FakturoError::EngineTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            FakturoError::Http(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            FakturoError::Downstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            FakturoError::Database(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            FakturoError::Engine(msg)
            | FakturoError::Configuration(msg)
            | FakturoError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            FakturoError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, FakturoError>;
