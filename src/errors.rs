//! Tagged error kinds for the orchestration core, and their mapping onto the
//! HTTP response envelope.
//!
//! Mirrors the teacher's `FacilitatorLocalError -> IntoResponse` pattern:
//! one place maps error *kind* to status code, so handlers never inspect
//! error messages to decide how to respond.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

/// The single error type returned by every core component.
///
/// Variants correspond 1:1 to the error kinds in the specification: malformed
/// input, authentication/authorization failure, illegal state transition,
/// failure of an external collaborator, missing/invalid configuration, and
/// the two HTTP-specific kinds (rate limiting, feature disabled).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    State(String),
    #[error("{0}")]
    External(String),
    #[error("{0}")]
    Config(String),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("{0}")]
    Disabled(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }
    pub fn auth(msg: impl Into<String>) -> Self {
        CoreError::Auth(msg.into())
    }
    pub fn state(msg: impl Into<String>) -> Self {
        CoreError::State(msg.into())
    }
    pub fn external(msg: impl Into<String>) -> Self {
        CoreError::External(msg.into())
    }
    pub fn config(msg: impl Into<String>) -> Self {
        CoreError::Config(msg.into())
    }
    pub fn disabled(msg: impl Into<String>) -> Self {
        CoreError::Disabled(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
            CoreError::State(_) => StatusCode::BAD_REQUEST,
            CoreError::External(_) => StatusCode::BAD_GATEWAY,
            CoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Disabled(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// The uniform response envelope for every JSON response, success or error.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Envelope {
            success: true,
            data: Some(data),
            message: None,
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl Envelope<()> {
    pub fn err(error: impl Into<String>) -> Self {
        Envelope {
            success: false,
            data: None,
            message: None,
            error: Some(error.into()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::warn!(error = %self, status = %status, "request failed");
        let mut response = (
            status,
            Json(json!({
                "success": false,
                "error": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
            .into_response();
        if let CoreError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
