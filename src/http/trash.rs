//! Trash listing, restore and purge.

use super::error::{ApiError, ApiResult};
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use crate::error::Error;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

/// `GET /api/v1/trash` — trashed entries the caller owns or deleted; admins see everything.
pub(super) async fn list(State(state): State<AppState>, claims: Claims) -> ApiResult<Response> {
    let mut entries = state.meta().list_trash().await?;
    if !claims.is_admin {
        entries.retain(|e| {
            e.owner.as_deref() == Some(claims.user_id.as_str()) || e.deleted_by.as_deref() == Some(claims.user_id.as_str())
        });
    }
    Ok(axum::Json(json!({ "entries": entries })).into_response())
}

#[derive(Deserialize)]
pub(super) struct PathBody {
    path: String,
}

/// `POST /api/v1/trash/restore` with `{path}` — restore a trashed subtree to its original
/// location.
pub(super) async fn restore(
    State(state): State<AppState>,
    claims: Claims,
    axum::Json(body): axum::Json<PathBody>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&body.path)?;
    let restored = state.pipeline.restore(&claims, &path).await?;
    state.tree.refresh().await?;
    Ok(axum::Json(json!({ "path": path, "restored": restored })).into_response())
}

/// `POST /api/v1/trash/purge` with `{path}` — permanently remove a trashed subtree.
pub(super) async fn purge(
    State(state): State<AppState>,
    claims: Claims,
    axum::Json(body): axum::Json<PathBody>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&body.path)?;
    let purged = state.pipeline.purge(&claims, &path).await?;
    Ok(axum::Json(json!({ "path": path, "purged": purged })).into_response())
}

/// `DELETE /api/v1/trash` — empty the whole trash. Admin only.
pub(super) async fn purge_all(State(state): State<AppState>, claims: Claims) -> ApiResult<Response> {
    if !claims.is_admin {
        return Err(ApiError(Error::forbidden("emptying the trash is admin-only")));
    }
    let purged = state.pipeline.purge_all().await?;
    Ok(axum::Json(json!({ "purged": purged })).into_response())
}
