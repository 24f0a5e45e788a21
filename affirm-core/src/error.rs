//! API error kinds and their HTTP mapping (§7 of the design).

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("quota exceeded")]
    QuotaExceeded { limit: i64, used: i64, tier: String },

    #[error("rate limited")]
    RateLimited { retry_after_sec: i64 },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("request timed out")]
    Timeout { retry_after_sec: Option<i64> },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Common(#[from] affirm_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None)
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            ApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None)
            }
            ApiError::QuotaExceeded { limit, used, tier } => (
                StatusCode::FORBIDDEN,
                "SUBSCRIPTION_LIMIT_EXCEEDED",
                "monthly custom-session quota exceeded".to_string(),
                Some(json!({ "limit": limit, "used": used, "tier": tier })),
            ),
            ApiError::RateLimited { retry_after_sec } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "too many requests".to_string(),
                Some(json!({ "retryAfter": retry_after_sec })),
            ),
            ApiError::UpstreamUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UPSTREAM_UNAVAILABLE",
                msg.clone(),
                None,
            ),
            ApiError::Conflict(msg) => (StatusCode::BAD_REQUEST, "CONFLICT", msg.clone(), None),
            ApiError::Timeout { retry_after_sec } => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                "request deadline exceeded".to_string(),
                retry_after_sec.map(|s| json!({ "retryAfter": s })),
            ),
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "an unexpected error occurred".to_string(),
                    None,
                )
            }
            ApiError::Common(err) => {
                tracing::error!("common error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "an unexpected error occurred".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({
            "error": code,
            "code": code,
            "message": message,
        });
        if let Some(details) = details {
            body["details"] = details;
        }

        let mut response = (status, Json(body)).into_response();

        if let ApiError::RateLimited { retry_after_sec } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_sec.to_string()) {
                response.headers_mut().insert("Retry-After", value.clone());
                response.headers_mut().insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
            }
        }

        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
