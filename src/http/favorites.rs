//! Per-user favorites.

use super::error::ApiResult;
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// `GET /api/v1/favorites` — the caller's favorites that still resolve to live entries.
pub(super) async fn list(State(state): State<AppState>, claims: Claims) -> ApiResult<Response> {
    let entries = state.meta().favorites(&claims.user_id).await?;
    Ok(axum::Json(json!({ "entries": entries })).into_response())
}

/// `PUT /api/v1/favorites/{path}`.
pub(super) async fn add(State(state): State<AppState>, claims: Claims, Path(raw): Path<String>) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    // Favoriting requires being able to see the entry at all.
    state.pipeline.stat(&claims, &path).await?;
    state.meta().favorite_add(&claims.user_id, &path).await?;
    Ok(StatusCode::CREATED.into_response())
}

/// `DELETE /api/v1/favorites/{path}`.
pub(super) async fn remove(State(state): State<AppState>, claims: Claims, Path(raw): Path<String>) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    state.meta().favorite_remove(&claims.user_id, &path).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
