//! Permission and visibility management endpoints.

use super::error::{ApiError, ApiResult};
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use crate::error::Error;
use crate::meta::Visibility;
use crate::perm::Level;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

// Permission management is open to admins and to holders of `owner` on the path.
async fn require_manager(state: &AppState, claims: &Claims, path: &str) -> Result<(), ApiError> {
    if state.pipeline.perms().check(&claims.user_id, path, Level::Owner, claims.is_admin).await? {
        return Ok(());
    }
    Err(ApiError(Error::forbidden(format!("permissions of {path} are owner-managed"))))
}

/// `GET /api/v1/permissions/{path}` — grants attached to the path.
pub(super) async fn list(State(state): State<AppState>, claims: Claims, Path(raw): Path<String>) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    require_manager(&state, &claims, &path).await?;
    let grants = state.pipeline.perms().list_permissions(&path).await?;
    Ok(axum::Json(json!({ "path": path, "permissions": grants })).into_response())
}

#[derive(Deserialize)]
pub(super) struct GrantBody {
    user_id: String,
    level: Level,
}

/// `PUT /api/v1/permissions/{path}` with `{user_id, level}`.
pub(super) async fn set(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    axum::Json(body): axum::Json<GrantBody>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    require_manager(&state, &claims, &path).await?;
    state.pipeline.perms().set_permission(&body.user_id, &path, body.level).await?;
    Ok(StatusCode::CREATED.into_response())
}

#[derive(Deserialize)]
pub(super) struct RevokeQuery {
    user: String,
}

/// `DELETE /api/v1/permissions/{path}?user=…`.
pub(super) async fn remove(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    Query(query): Query<RevokeQuery>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    require_manager(&state, &claims, &path).await?;
    state.pipeline.perms().remove_permission(&query.user, &path).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /api/v1/visibility/{path}`.
pub(super) async fn get_visibility(State(state): State<AppState>, claims: Claims, Path(raw): Path<String>) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    let entry = state.pipeline.stat(&claims, &path).await?;
    Ok(axum::Json(json!({ "path": path, "visibility": entry.visibility, "group_id": entry.group_id })).into_response())
}

#[derive(Deserialize)]
pub(super) struct VisibilityBody {
    visibility: Visibility,
    group_id: Option<String>,
}

/// `PUT /api/v1/visibility/{path}` with `{visibility, group_id?}` — owner or admin only.
pub(super) async fn set_visibility(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    axum::Json(body): axum::Json<VisibilityBody>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    state.pipeline.set_visibility(&claims, &path, body.visibility, body.group_id).await?;
    state.tree.refresh().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
