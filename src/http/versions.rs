//! Version listing, historical content retrieval and rollback.

use super::error::{ApiError, ApiResult};
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use crate::error::Error;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

#[derive(Deserialize)]
pub(super) struct VersionQuery {
    v: Option<i64>,
}

/// `GET /api/v1/versions/{path}` lists version records; with `?v=N` it streams that version's
/// bytes instead, stamped with `X-Version` and `X-Version-Hash`.
pub(super) async fn list_or_fetch(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    Query(query): Query<VersionQuery>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    if let Some(version) = query.v {
        let (record, read) = state.pipeline.read_version(&claims, &path, version).await?;
        return Response::builder()
            .header("X-Version", record.version.to_string())
            .header("X-Version-Hash", record.hash.clone())
            .header(header::CONTENT_TYPE, crate::mime::from_path(&path))
            .header(header::CONTENT_LENGTH, read.length.to_string())
            .body(Body::from_stream(ReaderStream::new(read.stream)))
            .map_err(|e| ApiError(Error::Internal(format!("response build: {e}"))));
    }

    // Listing still requires read access to the path.
    state.pipeline.stat(&claims, &path).await?;
    let (records, current) = state.pipeline.meta().list_versions(&path).await?;
    let versions: Vec<_> = records
        .iter()
        .map(|r| json!({ "version": r.version, "size": r.size, "hash": r.hash, "created_at": r.created_at }))
        .collect();
    Ok(axum::Json(json!({ "path": path, "current_version": current, "versions": versions })).into_response())
}

#[derive(Deserialize)]
pub(super) struct RollbackBody {
    version: i64,
}

/// `POST /api/v1/versions/{path}` with `{version: N}` — roll the file back.
pub(super) async fn rollback(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    axum::Json(body): axum::Json<RollbackBody>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    let outcome = state.pipeline.rollback(&claims, &path, body.version).await?;
    state.tree.refresh().await?;
    Ok(axum::Json(outcome).into_response())
}
