//! Tree listing, directory creation and soft-delete.

use super::error::{ApiError, ApiResult};
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use crate::error::Error;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;
use serde_json::json;
use std::io::Write;

/// `GET /api/v1/tree` — the caller's filtered view of the whole namespace. Honours
/// `Accept-Encoding: gzip`.
pub(super) async fn full_tree(State(state): State<AppState>, claims: Claims, headers: HeaderMap) -> ApiResult<Response> {
    let root = state.tree.filtered(&claims).await?;
    tree_response(&headers, json!({ "root": root }))
}

/// `GET /api/v1/tree/{path}` — a filtered subtree.
pub(super) async fn subtree(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    let node = state
        .tree
        .filtered_at(&claims, &path)
        .await?
        .ok_or_else(|| ApiError(Error::not_found(path.clone())))?;
    tree_response(&headers, json!({ "root": node }))
}

fn tree_response(headers: &HeaderMap, body: serde_json::Value) -> ApiResult<Response> {
    let accepts_gzip = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));
    let raw = serde_json::to_vec(&body).map_err(|e| ApiError(Error::Internal(format!("serialize tree: {e}"))))?;
    if !accepts_gzip {
        return Ok(([(header::CONTENT_TYPE, "application/json")], raw).into_response());
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .and_then(|_| encoder.finish())
        .map(|compressed| {
            (
                [
                    (header::CONTENT_TYPE, "application/json"),
                    (header::CONTENT_ENCODING, "gzip"),
                ],
                compressed,
            )
                .into_response()
        })
        .map_err(|e| ApiError(Error::Internal(format!("gzip tree: {e}"))))
}

#[derive(Deserialize)]
pub(super) struct CreateQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// `PUT /api/v1/tree/{path}?type=dir` — create a directory.
pub(super) async fn create_dir(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    Query(query): Query<CreateQuery>,
) -> ApiResult<Response> {
    if query.kind.as_deref() != Some("dir") {
        return Err(ApiError(Error::bad_request("only type=dir is supported")));
    }
    let path = normalize_wildcard(&raw)?;
    let dir = state.pipeline.mkdir(&claims, &path).await?;
    state.tree.refresh().await?;
    Ok((StatusCode::CREATED, axum::Json(dir)).into_response())
}

/// `DELETE /api/v1/tree/{path}` — soft-delete (move to trash).
pub(super) async fn soft_delete(State(state): State<AppState>, claims: Claims, Path(raw): Path<String>) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    let affected = state.pipeline.delete(&claims, &path).await?;
    state.tree.refresh().await?;
    Ok(axum::Json(json!({ "path": path, "deleted": affected })).into_response())
}
