//! Share link management and the public, unauthenticated download path.

use super::error::{ApiError, ApiResult};
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use crate::error::Error;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

#[derive(Deserialize)]
pub(super) struct CreateBody {
    path: String,
    password: Option<String>,
    expires_in: Option<i64>,
    max_downloads: Option<i64>,
}

/// `POST /api/v1/share` — create a link for a path the caller can read.
pub(super) async fn create(
    State(state): State<AppState>,
    claims: Claims,
    axum::Json(body): axum::Json<CreateBody>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&body.path)?;
    let entry = state.pipeline.stat(&claims, &path).await?;
    if entry.is_dir {
        return Err(ApiError(Error::bad_request("directories cannot be shared by link")));
    }
    let link = state
        .shares
        .create(&path, &claims.user_id, body.password.as_deref(), body.expires_in, body.max_downloads)
        .await?;
    Ok((StatusCode::CREATED, axum::Json(link)).into_response())
}

#[derive(Deserialize)]
pub(super) struct ListQuery {
    path: Option<String>,
    #[serde(default)]
    all: bool,
    #[serde(default)]
    active: bool,
}

/// `GET /api/v1/share` — the caller's links; `?path=` filters by target, `?all=true` lists
/// everything (admin only).
pub(super) async fn list(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let links = if query.all {
        if !claims.is_admin {
            return Err(ApiError(Error::forbidden("listing all share links is admin-only")));
        }
        state.shares.list_all(query.active).await?
    } else if let Some(raw) = &query.path {
        let path = normalize_wildcard(raw)?;
        state.pipeline.stat(&claims, &path).await?;
        state.shares.list_by_path(&path).await?
    } else {
        state.shares.list_by_user(&claims.user_id).await?
    };
    Ok(axum::Json(json!({ "links": links })).into_response())
}

/// `DELETE /api/v1/share/{id}` — revoke; creator or admin.
pub(super) async fn revoke(State(state): State<AppState>, claims: Claims, Path(id): Path<String>) -> ApiResult<Response> {
    let link = state.shares.get(&id).await?.ok_or_else(|| ApiError(Error::not_found("share link")))?;
    if link.created_by != claims.user_id && !claims.is_admin {
        return Err(ApiError(Error::forbidden("only the creator may revoke a share link")));
    }
    state.shares.revoke(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Deserialize)]
pub(super) struct DownloadQuery {
    password: Option<String>,
}

/// `GET /api/v1/share/{token}[?password=…]` — public download, no bearer credential. The
/// counter is bumped only once the response stream has been initiated.
pub(super) async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let link = state.shares.validate(&token, query.password.as_deref()).await?;
    let entry = state
        .meta()
        .get_live(&link.path)
        .await?
        .ok_or_else(|| ApiError(Error::not_found("shared file no longer exists")))?;

    // Streaming straight off the entry's back-end; the engine does no I/O of its own.
    let (_, read) = state
        .pipeline
        .read(&Claims::admin("share-link"), &link.path, None)
        .await?;
    state.shares.increment_downloads(&token).await?;

    let filename = crate::pathutil::name_of(&entry.path);
    Response::builder()
        .header(header::CONTENT_TYPE, crate::mime::from_path(&entry.path))
        .header(header::CONTENT_LENGTH, read.length.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(ReaderStream::new(read.stream)))
        .map_err(|e| ApiError(Error::Internal(format!("response build: {e}"))))
}

/// `GET /api/v1/share/{token}/info` — link metadata for the download page.
pub(super) async fn info(State(state): State<AppState>, Path(token): Path<String>) -> ApiResult<Response> {
    let Some(link) = state.shares.get(&token).await? else {
        return Ok(axum::Json(json!({ "valid": false, "error": "not found" })).into_response());
    };
    let entry = state.meta().get_live(&link.path).await?;
    let (valid, error) = match state.shares.validate(&token, None).await {
        Ok(_) => (true, None),
        // A password prompt is still a usable link as far as the page is concerned.
        Err(Error::Forbidden(msg)) if msg.contains("password") => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    Ok(axum::Json(json!({
        "file_name": entry.as_ref().map(|e| e.name.clone()).unwrap_or_default(),
        "file_size": entry.as_ref().map(|e| e.size).unwrap_or(0),
        "has_password": link.has_password(),
        "expires_at": link.expires_at,
        "valid": valid && entry.is_some(),
        "error": error,
    }))
    .into_response())
}
