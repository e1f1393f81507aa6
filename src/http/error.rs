//! Maps core errors onto HTTP responses: a status code and an `{error, code}` JSON body.
//! Conflicts additionally carry the current state so the client can merge and retry.

use crate::error::Error;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper giving [`Error`] an [`IntoResponse`] implementation.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> ApiError {
        ApiError(e)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> ApiError {
        ApiError(Error::Db(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self.0 {
            Error::Conflict {
                path,
                expected_version,
                current_version,
                current_hash,
            } => json!({
                "error": self.0.to_string(),
                "code": status.as_u16(),
                "path": path,
                "expected_version": expected_version,
                "current_version": current_version,
                "current_hash": current_hash,
            }),
            other => json!({
                "error": other.to_string(),
                "code": status.as_u16(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
