// =============================================================================
// API errors: mapping to HTTP responses
// =============================================================================
//
// Request validation failures are returned to the caller as-is (400).
// Upstream failures are logged in full and surface as a generic 500; the
// upstream status and body never reach the response.
// =============================================================================

use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::connect::UpstreamError;

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(msg) => {
                warn!(error = %msg, "rejecting request");
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            Self::Upstream(e) => {
                error!(
                    error = %e,
                    upstream_status = ?e.status(),
                    upstream_body = e.body().unwrap_or_default(),
                    "upstream call failed"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
