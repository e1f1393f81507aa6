//! User albums over processed images.

use super::error::ApiResult;
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

/// `GET /api/v1/albums` — the caller's albums.
pub(super) async fn list(State(state): State<AppState>, claims: Claims) -> ApiResult<Response> {
    let albums = state.media.albums(&claims.user_id).await?;
    Ok(axum::Json(json!({ "albums": albums })).into_response())
}

#[derive(Deserialize)]
pub(super) struct CreateBody {
    name: String,
}

/// `POST /api/v1/albums` with `{name}`.
pub(super) async fn create(
    State(state): State<AppState>,
    claims: Claims,
    axum::Json(body): axum::Json<CreateBody>,
) -> ApiResult<Response> {
    let id = state.media.create_album(&claims.user_id, &body.name).await?;
    Ok((StatusCode::CREATED, axum::Json(json!({ "id": id, "name": body.name }))).into_response())
}

/// `GET /api/v1/albums/{id}` — paths in the album.
pub(super) async fn images(State(state): State<AppState>, _claims: Claims, Path(id): Path<String>) -> ApiResult<Response> {
    let paths = state.media.album_images(&id).await?;
    Ok(axum::Json(json!({ "id": id, "images": paths })).into_response())
}

#[derive(Deserialize)]
pub(super) struct AddImageBody {
    path: String,
}

/// `POST /api/v1/albums/{id}` with `{path}` — add an image the caller can read.
pub(super) async fn add_image(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    axum::Json(body): axum::Json<AddImageBody>,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&body.path)?;
    state.pipeline.stat(&claims, &path).await?;
    state.media.add_album_image(&id, &path).await?;
    Ok(StatusCode::CREATED.into_response())
}
