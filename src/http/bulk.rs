//! Bulk operations: move, copy, share, tag. Items are processed in request order; per-item
//! failures are collected and the rest continue.

use super::error::{ApiError, ApiResult};
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use crate::error::Error;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub(super) struct MoveItem {
    from: String,
    to: String,
}

#[derive(Deserialize, Default)]
pub(super) struct BulkBody {
    #[serde(default)]
    items: Vec<MoveItem>,
    #[serde(default)]
    paths: Vec<String>,
    tag: Option<String>,
    password: Option<String>,
    expires_in: Option<i64>,
    max_downloads: Option<i64>,
}

/// `POST /api/v1/bulk/{move|copy|share|tag}` — returns `{succeeded, failed, errors}`.
pub(super) async fn run(
    State(state): State<AppState>,
    claims: Claims,
    Path(op): Path<String>,
    axum::Json(body): axum::Json<BulkBody>,
) -> ApiResult<Response> {
    let mut succeeded = 0usize;
    let mut errors: Vec<String> = Vec::new();
    let mut record = |result: Result<(), Error>, what: &str| match result {
        Ok(()) => succeeded += 1,
        Err(e) => errors.push(format!("{what}: {e}")),
    };

    match op.as_str() {
        "move" | "copy" => {
            for item in &body.items {
                let outcome = async {
                    let from = normalize_wildcard(&item.from).map_err(|e| e.0)?;
                    let to = normalize_wildcard(&item.to).map_err(|e| e.0)?;
                    if op == "move" {
                        state.pipeline.move_entry(&claims, &from, &to).await
                    } else {
                        state.pipeline.copy_entry(&claims, &from, &to).await.map(|_| ())
                    }
                }
                .await;
                record(outcome, &format!("{} -> {}", item.from, item.to));
            }
            state.tree.refresh().await?;
        }
        "share" => {
            for raw in &body.paths {
                let outcome = async {
                    let path = normalize_wildcard(raw).map_err(|e| e.0)?;
                    state.pipeline.stat(&claims, &path).await?;
                    state
                        .shares
                        .create(&path, &claims.user_id, body.password.as_deref(), body.expires_in, body.max_downloads)
                        .await
                        .map(|_| ())
                }
                .await;
                record(outcome, raw);
            }
        }
        "tag" => {
            let Some(tag) = body.tag.as_deref().filter(|t| !t.is_empty()) else {
                return Err(ApiError(Error::bad_request("tag must not be empty")));
            };
            for raw in &body.paths {
                let outcome = async {
                    let path = normalize_wildcard(raw).map_err(|e| e.0)?;
                    state.pipeline.stat(&claims, &path).await?;
                    state.media.add_user_tag(&path, tag).await
                }
                .await;
                record(outcome, raw);
            }
        }
        other => return Err(ApiError(Error::bad_request(format!("unknown bulk operation {other:?}")))),
    }

    let failed = errors.len();
    Ok(axum::Json(json!({ "succeeded": succeeded, "failed": failed, "errors": errors })).into_response())
}
