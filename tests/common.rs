//! Shared fixture: a fully wired API router over an in-memory database and an in-memory
//! object store, with a static token table standing in for the external auth service.
#![allow(missing_docs)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use haven_core::storage::ObjectStore;
use haven_sbe_mem::InMemory;
use http_body_util::BodyExt;
use libhaven::auth::{Claims, StaticTokens};
use libhaven::http::{AppState, router};
use libhaven::media::MediaStore;
use libhaven::meta::{MetaStore, connect_memory};
use libhaven::notify::Broadcaster;
use libhaven::perm::{Evaluator, GroupRole, Level};
use libhaven::pipeline::WritePipeline;
use libhaven::quota::Gate;
use libhaven::routing::StorageRouter;
use libhaven::share::ShareLinks;
use libhaven::tree::TreeCache;
use libhaven::upload::ChunkedUploads;
use std::sync::Arc;
use tower::ServiceExt;

pub const CHUNK_SIZE: i64 = 5;

pub struct TestServer {
    pub app: Router,
    pub backend: Arc<InMemory>,
    pub perms: Evaluator,
    pub meta: MetaStore,
    _tmp: tempfile::TempDir,
}

/// Alice owns `/`, Bob and Uma start with nothing, `root` is an administrator, and Uma is a
/// viewer in group `g1`.
pub async fn server() -> TestServer {
    let pool = connect_memory().await.unwrap();
    let logger = slog::Logger::root(slog::Discard, slog::o!());
    let meta = MetaStore::new(pool.clone(), logger.clone());
    let perms = Evaluator::new(pool.clone(), logger.clone());
    perms.set_permission("alice", "/", Level::Owner).await.unwrap();
    perms.set_group_member("g1", "uma", GroupRole::Viewer).await.unwrap();

    let gate = Gate::new(pool.clone(), 1024 * 1024, logger.clone());
    let backend = Arc::new(InMemory::new());
    let storage_router = Arc::new(StorageRouter::new(backend.clone() as Arc<dyn ObjectStore>));
    let events = Arc::new(Broadcaster::new(64));
    let pipeline = WritePipeline::new(
        meta.clone(),
        storage_router,
        perms.clone(),
        gate,
        events.clone(),
        None,
        logger.clone(),
    );
    let tmp = tempfile::tempdir().unwrap();
    let uploads = ChunkedUploads::new(pool.clone(), pipeline.clone(), tmp.path(), CHUNK_SIZE, logger.clone());
    let shares = ShareLinks::new(pool.clone(), logger.clone());
    let tree = Arc::new(TreeCache::new(meta.clone(), perms.clone(), logger.clone()));
    tree.refresh().await.unwrap();

    let verifier = StaticTokens::new()
        .with_token("alice-token", Claims::user("alice"))
        .with_token("bob-token", Claims::user("bob"))
        .with_token("uma-token", Claims::user("uma"))
        .with_token("admin-token", Claims::admin("root"));

    let state = AppState {
        pipeline,
        uploads,
        shares,
        tree,
        events,
        media: MediaStore::new(pool),
        media_queue: None,
        verifier: Arc::new(verifier),
        logger,
    };
    TestServer {
        app: router(state, 64 * 1024 * 1024),
        backend,
        perms,
        meta,
        _tmp: tmp,
    }
}

impl TestServer {
    pub async fn request(&self, req: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(req).await.unwrap()
    }

    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Body) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if matches!(method, "POST" | "PUT") {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        self.request(builder.body(body).unwrap()).await
    }

    pub async fn send_raw(&self, method: &str, uri: &str, token: &str, body: &[u8]) -> Response<Body> {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(body.to_vec()))
            .unwrap();
        self.request(req).await
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn sha256_hex(body: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(body))
}
