//! Content download and single-shot upload.

use super::error::{ApiError, ApiResult};
use super::{AppState, normalize_wildcard, range};
use crate::auth::Claims;
use crate::error::Error;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio_util::io::ReaderStream;

/// `GET /api/v1/content/{path}` — file bytes, honouring single `Range` requests. The response
/// carries `ETag` (the content hash), `X-Version` and a `Content-Type` derived from the
/// extension.
pub(super) async fn download(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    let entry = state.pipeline.stat(&claims, &path).await?;
    if entry.is_dir {
        return Err(ApiError(Error::bad_request(format!("{path} is a directory"))));
    }

    let parsed = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| range::parse(v, entry.size as u64));
    let (_, read) = state
        .pipeline
        .read(&claims, &path, parsed.map(|r| (r.offset, r.length)))
        .await?;
    let served = read.length as i64;

    if let Err(e) = state.pipeline.gate().track_bandwidth(&claims.user_id, 0, served).await {
        slog::warn!(state.logger, "bandwidth tracking failed"; "error" => %e);
    }

    let mut response = Response::builder()
        .status(if parsed.is_some() { StatusCode::PARTIAL_CONTENT } else { StatusCode::OK })
        .header(header::ETAG, format!("\"{}\"", entry.hash))
        .header("X-Version", entry.version.to_string())
        .header(header::CONTENT_TYPE, crate::mime::from_path(&path))
        .header(header::CONTENT_LENGTH, read.length.to_string());
    if let Some(r) = parsed {
        response = response.header(header::CONTENT_RANGE, r.content_range());
    }
    response
        .body(Body::from_stream(ReaderStream::new(read.stream)))
        .map_err(|e| ApiError(Error::Internal(format!("response build: {e}"))))
}

/// `POST /api/v1/content/{path}` — raw body write with optional optimistic-concurrency
/// headers `X-Expected-Version` and `If-Match`.
pub(super) async fn upload(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    let expected_version = match headers.get("X-Expected-Version").and_then(|v| v.to_str().ok()) {
        Some(v) => Some(
            v.parse::<i64>()
                .map_err(|_| ApiError(Error::bad_request("X-Expected-Version must be an integer")))?,
        ),
        None => None,
    };
    let expected_hash = headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string());

    let outcome = state
        .pipeline
        .write(&claims, &path, body, expected_version, expected_hash.as_deref())
        .await?;
    state.tree.refresh().await?;
    Ok((StatusCode::CREATED, axum::Json(outcome)).into_response())
}
