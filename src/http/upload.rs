//! The resumable upload endpoints.

use super::error::ApiResult;
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub(super) struct InitBody {
    path: String,
    #[serde(rename = "fileName")]
    file_name: String,
    #[serde(rename = "fileSize")]
    file_size: i64,
}

/// `POST /api/v1/upload/init` — open a session; returns the id and the chunking parameters.
pub(super) async fn init(
    State(state): State<AppState>,
    claims: Claims,
    axum::Json(body): axum::Json<InitBody>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&body.path)?;
    let session = state.uploads.init(&claims, &path, &body.file_name, body.file_size).await?;
    Ok((
        StatusCode::CREATED,
        axum::Json(json!({
            "uploadId": session.id,
            "chunkSize": session.chunk_size,
            "totalChunks": session.total_chunks,
        })),
    )
        .into_response())
}

/// `PUT /api/v1/upload/{id}/chunk/{index}` — body is the chunk bytes.
pub(super) async fn chunk(
    State(state): State<AppState>,
    claims: Claims,
    Path((id, index)): Path<(String, i64)>,
    body: Bytes,
) -> ApiResult<Response> {
    let size = body.len();
    state.uploads.chunk(&claims, &id, index, body).await?;
    Ok(axum::Json(json!({ "uploadId": id, "chunkIndex": index, "received": size })).into_response())
}

/// `POST /api/v1/upload/{id}/complete` — assemble and commit; same response shape as a
/// single-shot upload.
pub(super) async fn complete(State(state): State<AppState>, claims: Claims, Path(id): Path<String>) -> ApiResult<Response> {
    let outcome = state.uploads.complete(&claims, &id).await?;
    state.tree.refresh().await?;
    Ok((StatusCode::CREATED, axum::Json(outcome)).into_response())
}

/// `GET /api/v1/upload/{id}` — received chunk indices and status, for resume.
pub(super) async fn status(State(state): State<AppState>, claims: Claims, Path(id): Path<String>) -> ApiResult<Response> {
    let (session, received) = state.uploads.status(&claims, &id).await?;
    Ok(axum::Json(json!({
        "totalChunks": session.total_chunks,
        "received": received,
        "status": session.status,
    }))
    .into_response())
}

/// `DELETE /api/v1/upload/{id}` — abort the session.
pub(super) async fn abort(State(state): State<AppState>, claims: Claims, Path(id): Path<String>) -> ApiResult<Response> {
    state.uploads.abort(&claims, &id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
