//! API error types and their HTTP mapping.
//!
//! Every handler returns `ApiResult<T>`; `ApiError` maps to the `{code,
//! message, details?, retryAfterMs?}` envelope used for 4xx/5xx responses
//! across the HTTP surface (spec §6), centralizing the error-to-HTTP mapping
//! in one `IntoResponse` adapter.

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::OrchestratorError;

/// Wire format for an API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(rename = "retryAfterMs", skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors the HTTP layer can return.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("too many concurrent event streams")]
    TooManyRequests,

    #[error("internal server error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Orchestrator(OrchestratorError::PlanNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Orchestrator(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::TooManyRequests => "too_many_requests",
            ApiError::InternalError(_) => "internal_error",
            ApiError::Orchestrator(OrchestratorError::PlanNotFound(_)) => "plan_not_found",
            ApiError::Orchestrator(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            details: None,
            retry_after_ms: None,
        };

        tracing::warn!(code = body.code, status = %status, "api error");

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError::NotFound("plan".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn too_many_requests_maps_to_429() {
        let err = ApiError::TooManyRequests;
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.code(), "too_many_requests");
    }

    #[test]
    fn validation_error_maps_to_422() {
        let err = ApiError::ValidationError("goal cannot be empty".to_string());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
