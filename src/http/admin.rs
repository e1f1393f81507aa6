//! Admin quota management.

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::auth::Claims;
use crate::error::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.is_admin {
        Ok(())
    } else {
        Err(ApiError(Error::forbidden("quota management is admin-only")))
    }
}

/// `GET /api/v1/admin/quotas/{user}` — the user's limits and current usage.
pub(super) async fn get_quota(State(state): State<AppState>, claims: Claims, Path(user): Path<String>) -> ApiResult<Response> {
    require_admin(&claims)?;
    let quota = state.pipeline.gate().get_quota(&user).await?;
    let used = state.meta().storage_used(&user).await?;
    let (up, down) = state.pipeline.gate().bandwidth_today(&user).await?;
    Ok(axum::Json(json!({
        "user_id": user,
        "max_storage_bytes": quota.as_ref().map(|q| q.max_storage_bytes).unwrap_or(0),
        "max_upload_bytes": quota.as_ref().map(|q| q.max_upload_bytes).unwrap_or(0),
        "used_bytes": used,
        "bandwidth_today": { "up": up, "down": down },
    }))
    .into_response())
}

#[derive(Deserialize)]
pub(super) struct QuotaBody {
    #[serde(default)]
    max_storage_bytes: i64,
    #[serde(default)]
    max_upload_bytes: i64,
}

/// `PUT /api/v1/admin/quotas/{user}` with `{max_storage_bytes, max_upload_bytes}`; zero means
/// unlimited / process default.
pub(super) async fn set_quota(
    State(state): State<AppState>,
    claims: Claims,
    Path(user): Path<String>,
    axum::Json(body): axum::Json<QuotaBody>,
) -> ApiResult<Response> {
    require_admin(&claims)?;
    state
        .pipeline
        .gate()
        .set_quota(&user, body.max_storage_bytes, body.max_upload_bytes)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
