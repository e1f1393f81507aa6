//! Name search over the live namespace.

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::auth::Claims;
use crate::error::Error;
use crate::meta::SearchKind;
use crate::perm::Level;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub(super) struct SearchQuery {
    q: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// `GET /api/v1/search?q=…&type=files|dirs|images` — results are filtered down to entries the
/// caller may read.
pub(super) async fn search(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Response> {
    if query.q.is_empty() {
        return Err(ApiError(Error::bad_request("q must not be empty")));
    }
    let kind = match query.kind.as_deref() {
        None | Some("all") => SearchKind::All,
        Some("files") => SearchKind::Files,
        Some("dirs") => SearchKind::Dirs,
        Some("images") => SearchKind::Images,
        Some(other) => return Err(ApiError(Error::bad_request(format!("unknown search type {other:?}")))),
    };
    let hits = state.meta().search(&query.q, kind).await?;

    // The same gates as tree filtering, with maps loaded once.
    let maps = state.pipeline.perms().load_access_maps(&claims.user_id).await?;
    let visible: Vec<_> = hits
        .into_iter()
        .filter(|e| maps.sees(&claims.user_id, e, claims.is_admin) && maps.allows(&claims.user_id, e, Level::Read, claims.is_admin))
        .collect();
    Ok(axum::Json(json!({ "entries": visible })).into_response())
}
