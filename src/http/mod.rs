//! The JSON/HTTP API, the SSE event stream and the WebDAV subset.
//!
//! Authentication is delegated to the external collaborator behind
//! [`TokenVerifier`](crate::auth::TokenVerifier): every authenticated endpoint extracts
//! [`Claims`] from the bearer credential. Routing stays thin; each handler normalizes its
//! path, calls into the core and maps the outcome through [`error::ApiError`].

pub mod error;
pub mod range;

mod admin;
mod albums;
mod bulk;
mod content;
mod events;
mod favorites;
mod perms;
mod search;
mod share;
mod trash;
mod tree;
mod upload;
mod versions;
mod webdav;

use crate::auth::{Claims, TokenVerifier};
use crate::error::Error;
use crate::media::{MediaStore, QueueHandle};
use crate::meta::MetaStore;
use crate::notify::Broadcaster;
use crate::pipeline::WritePipeline;
use crate::share::ShareLinks;
use crate::tree::TreeCache;
use crate::upload::ChunkedUploads;
use async_trait::async_trait;
use axum::Router;
use axum::extract::{DefaultBodyLimit, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::routing::{any, get, post, put};
use error::ApiError;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Everything the handlers need, cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// The write pipeline and, through it, the store, evaluator and gate.
    pub pipeline: WritePipeline,
    /// Chunked upload sessions.
    pub uploads: ChunkedUploads,
    /// Share link engine.
    pub shares: ShareLinks,
    /// Filtered tree cache.
    pub tree: Arc<TreeCache>,
    /// Event hub for the SSE stream.
    pub events: Arc<Broadcaster>,
    /// Media tables, for tags and albums.
    pub media: MediaStore,
    /// Handle into the media processor queue, when the processor is running.
    pub media_queue: Option<QueueHandle>,
    /// Bearer credential verifier.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Request logger.
    pub logger: slog::Logger,
}

impl AppState {
    fn meta(&self) -> &MetaStore {
        self.pipeline.meta()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Claims {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError(Error::Unauthenticated))?;
        state.verifier.verify(token).await.map_err(|_| ApiError(Error::Unauthenticated))
    }
}

/// Builds the full API router over the given state. `body_limit` bounds request bodies; it
/// should sit above the largest admissible upload chunk.
pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/api/v1/tree", get(tree::full_tree))
        .route(
            "/api/v1/tree/*path",
            get(tree::subtree).put(tree::create_dir).delete(tree::soft_delete),
        )
        .route("/api/v1/content/*path", get(content::download).post(content::upload))
        .route("/api/v1/versions/*path", get(versions::list_or_fetch).post(versions::rollback))
        .route("/api/v1/upload/init", post(upload::init))
        .route("/api/v1/upload/:id", get(upload::status).delete(upload::abort))
        .route("/api/v1/upload/:id/chunk/:index", put(upload::chunk))
        .route("/api/v1/upload/:id/complete", post(upload::complete))
        .route("/api/v1/trash", get(trash::list).delete(trash::purge_all))
        .route("/api/v1/trash/restore", post(trash::restore))
        .route("/api/v1/trash/purge", post(trash::purge))
        .route("/api/v1/favorites", get(favorites::list))
        .route("/api/v1/favorites/*path", put(favorites::add).delete(favorites::remove))
        .route("/api/v1/search", get(search::search))
        .route("/api/v1/bulk/:op", post(bulk::run))
        .route(
            "/api/v1/permissions/*path",
            get(perms::list).put(perms::set).delete(perms::remove),
        )
        .route(
            "/api/v1/visibility/*path",
            get(perms::get_visibility).put(perms::set_visibility),
        )
        .route("/api/v1/share", get(share::list).post(share::create))
        .route("/api/v1/share/:token", get(share::download).delete(share::revoke))
        .route("/api/v1/share/:token/info", get(share::info))
        .route("/api/v1/admin/quotas/:user", get(admin::get_quota).put(admin::set_quota))
        .route("/api/v1/albums", get(albums::list).post(albums::create))
        .route("/api/v1/albums/:id", get(albums::images).post(albums::add_image))
        .route("/api/v1/events", get(events::stream))
        .route("/dav/*path", any(webdav::handle))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Wildcard captures arrive without their leading slash.
pub(crate) fn normalize_wildcard(raw: &str) -> Result<String, ApiError> {
    crate::pathutil::normalize(&format!("/{raw}")).map_err(ApiError)
}
