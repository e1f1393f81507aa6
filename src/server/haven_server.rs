//! Server construction and lifecycle.

use super::shutdown::Shutdown;
use crate::auth::{StaticTokens, TokenVerifier};
use crate::http::AppState;
use crate::media::{MediaStore, Processor};
use crate::meta::{self, MetaStore};
use crate::notify::Broadcaster;
use crate::perm::Evaluator;
use crate::pipeline::WritePipeline;
use crate::quota::Gate;
use crate::routing::StorageRouter;
use crate::share::ShareLinks;
use crate::tree::TreeCache;
use crate::upload::{self, ChunkedUploads};
use haven_core::storage::ObjectStore;
use slog::{Drain, o};
use std::future::IntoFuture;
use std::{future::Future, path::PathBuf, pin::Pin, sync::Arc, time::Duration};
use thiserror::Error;

/// Failures starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The bind address could not be parsed or bound.
    #[error("bind failed: {0}")]
    Bind(#[from] std::io::Error),
    /// A core component failed during startup.
    #[error("startup failed: {0}")]
    Core(#[from] crate::error::Error),
    /// The builder was missing a required piece.
    #[error("configuration error: {0}")]
    Config(String),
}

/// An instance of a file storage server. It aggregates an object store per storage location, a
/// [`TokenVerifier`](crate::auth::TokenVerifier) for the external auth collaborator and the
/// metadata database, and serves the JSON API, the SSE stream and the WebDAV subset.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let backend = Arc::new(haven_sbe_fs::Filesystem::new("/srv/haven/objects").unwrap());
///     let server = libhaven::HavenServer::builder()
///         .database("sqlite://haven.db")
///         .default_backend(backend)
///         .build()
///         .unwrap();
///     server.listen("127.0.0.1:8080").await.unwrap();
/// }
/// ```
pub struct HavenServer {
    options: ServerBuilder,
}

/// Used to create [`HavenServer`]s.
pub struct ServerBuilder {
    database_url: String,
    default_backend: Option<Arc<dyn ObjectStore>>,
    locations: Vec<(String, Arc<dyn ObjectStore>)>,
    group_locations: Vec<(String, String)>,
    verifier: Arc<dyn TokenVerifier>,
    logger: slog::Logger,
    temp_dir: PathBuf,
    chunk_size: i64,
    upload_limit: i64,
    media_workers: usize,
    media_queue: usize,
    event_capacity: usize,
    janitor_interval: Duration,
    trash_max_age: Option<chrono::Duration>,
    grace_period: Duration,
    shutdown: Pin<Box<dyn Future<Output = ()> + Send + Sync>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        ServerBuilder {
            database_url: "sqlite://haven.db".to_string(),
            default_backend: None,
            locations: Vec::new(),
            group_locations: Vec::new(),
            verifier: Arc::new(StaticTokens::new()),
            logger: slog::Logger::root(slog_stdlog::StdLog {}.fuse(), o!()),
            temp_dir: std::env::temp_dir().join("haven-uploads"),
            chunk_size: upload::DEFAULT_CHUNK_SIZE,
            upload_limit: 512 * 1024 * 1024,
            media_workers: 2,
            media_queue: 1000,
            event_capacity: 256,
            janitor_interval: Duration::from_secs(15 * 60),
            trash_max_age: None,
            grace_period: Duration::from_secs(10),
            shutdown: Box::pin(futures_util::future::pending()),
        }
    }
}

impl ServerBuilder {
    /// The metadata database URL, e.g. `sqlite://haven.db` or `sqlite::memory:`.
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// The object store registered as the default storage location.
    pub fn default_backend(mut self, backend: Arc<dyn ObjectStore>) -> Self {
        self.default_backend = Some(backend);
        self
    }

    /// Registers an additional storage location.
    pub fn location(mut self, id: impl Into<String>, backend: Arc<dyn ObjectStore>) -> Self {
        self.locations.push((id.into(), backend));
        self
    }

    /// Routes a group's uploads to a registered location.
    pub fn group_location(mut self, group_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        self.group_locations.push((group_id.into(), location_id.into()));
        self
    }

    /// Sets the bearer credential verifier. Defaults to an empty static table, which rejects
    /// everything.
    pub fn verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Sets the structured logger ([slog](https://crates.io/crates/slog)::Logger) to use.
    pub fn logger<L: Into<Option<slog::Logger>>>(mut self, logger: L) -> Self {
        self.logger = logger
            .into()
            .unwrap_or_else(|| slog::Logger::root(slog_stdlog::StdLog {}.fuse(), o!()));
        self
    }

    /// Directory for chunked-upload temp files.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Fixed chunk size for resumable uploads.
    pub fn chunk_size(mut self, bytes: i64) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Process-wide upload size limit; per-user overrides win.
    pub fn upload_limit(mut self, bytes: i64) -> Self {
        self.upload_limit = bytes;
        self
    }

    /// Media worker count and queue capacity.
    pub fn media(mut self, workers: usize, queue: usize) -> Self {
        self.media_workers = workers;
        self.media_queue = queue;
        self
    }

    /// Interval of the janitor sweeping expired upload sessions (and aged trash when
    /// configured).
    pub fn janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval = interval;
        self
    }

    /// Automatically purge trash entries older than this.
    pub fn trash_max_age(mut self, age: chrono::Duration) -> Self {
        self.trash_max_age = Some(age);
        self
    }

    /// Allows telling the server when to shut down gracefully. The passed future resolving is
    /// the signal; the server then notifies its tasks and lingers for the grace period.
    pub fn shutdown_indicator<I>(mut self, indicator: I) -> Self
    where
        I: Future<Output = ()> + Send + Sync + 'static,
    {
        self.shutdown = Box::pin(indicator);
        self
    }

    /// How long shutdown waits for in-flight work before giving up.
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Finalizes the options.
    pub fn build(self) -> Result<HavenServer, ServerError> {
        if self.default_backend.is_none() {
            return Err(ServerError::Config("a default backend is required".to_string()));
        }
        Ok(HavenServer { options: self })
    }
}

impl HavenServer {
    /// Starts building a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Connects the database, starts the background tasks and serves until the shutdown
    /// indicator resolves.
    pub async fn listen(self, bind_address: &str) -> Result<(), ServerError> {
        let opts = self.options;
        let logger = opts.logger.clone();
        let default_backend = opts
            .default_backend
            .clone()
            .ok_or_else(|| ServerError::Config("a default backend is required".to_string()))?;

        let pool = meta::connect(&opts.database_url).await?;
        let meta_store = MetaStore::new(pool.clone(), logger.clone());
        let perms = Evaluator::new(pool.clone(), logger.clone());
        let gate = Gate::new(pool.clone(), opts.upload_limit, logger.clone());
        let events = Arc::new(Broadcaster::new(opts.event_capacity));

        let router = Arc::new(StorageRouter::new(default_backend));
        for (id, backend) in &opts.locations {
            router.register(id, backend.clone());
        }
        for (group, location) in &opts.group_locations {
            router.assign_group(group, location)?;
        }

        let shutdown = Arc::new(Shutdown::new());

        let media_store = MediaStore::new(pool.clone());
        let processor = Arc::new(Processor::new(media_store.clone(), meta_store.clone(), router.clone(), logger.clone()));
        let media_queue = processor.clone().spawn(opts.media_workers, opts.media_queue, &shutdown).await;
        if let Err(e) = processor.process_existing(&media_queue).await {
            slog::warn!(logger, "initial media sweep failed"; "error" => %e);
        }

        let pipeline = WritePipeline::new(
            meta_store.clone(),
            router.clone(),
            perms.clone(),
            gate.clone(),
            events.clone(),
            Some(media_queue.clone()),
            logger.clone(),
        );
        let uploads = ChunkedUploads::new(pool.clone(), pipeline.clone(), opts.temp_dir.clone(), opts.chunk_size, logger.clone());
        let shares = ShareLinks::new(pool.clone(), logger.clone());
        let tree = Arc::new(TreeCache::new(meta_store.clone(), perms.clone(), logger.clone()));
        tree.refresh().await?;

        spawn_janitor(
            uploads.clone(),
            pipeline.clone(),
            opts.trash_max_age,
            opts.janitor_interval,
            logger.clone(),
            &shutdown,
        )
        .await;
        spawn_tree_refresh(tree.clone(), events.clone(), logger.clone(), &shutdown).await;

        let state = AppState {
            pipeline,
            uploads,
            shares,
            tree,
            events,
            media: media_store,
            media_queue: Some(media_queue),
            verifier: opts.verifier.clone(),
            logger: logger.clone(),
        };
        // The body limit sits above the largest admissible single request.
        let body_limit = (opts.upload_limit.max(opts.chunk_size) as usize).saturating_add(1024 * 1024);
        let app = crate::http::router(state, body_limit);

        let listener = tokio::net::TcpListener::bind(bind_address).await?;
        slog::info!(logger, "listening"; "addr" => bind_address);

        let serve = axum::serve(listener, app).into_future();
        tokio::select! {
            result = serve => {
                result?;
                Ok(())
            }
            _ = opts.shutdown => {
                slog::debug!(logger, "shutting down within {:?}", opts.grace_period);
                shutdown.begin().await;
                Self::shutdown_linger(logger, shutdown, opts.grace_period).await
            }
        }
    }

    // Waits for the janitor, the tree-refresh loop and the media workers to wind down, or
    // gives up when the grace period expires.
    async fn shutdown_linger(logger: slog::Logger, shutdown: Arc<Shutdown>, grace: Duration) -> Result<(), ServerError> {
        let timeout = Box::pin(tokio::time::sleep(grace));
        tokio::select! {
            _ = shutdown.drained() => {
                slog::debug!(logger, "graceful shutdown complete");
                Ok(())
            }
            _ = timeout => Err(ServerError::Config("shutdown grace period expired".to_string())),
        }
    }
}

// The 15-minute sweep: expired upload sessions always, aged trash when configured.
async fn spawn_janitor(
    uploads: ChunkedUploads,
    pipeline: WritePipeline,
    trash_max_age: Option<chrono::Duration>,
    interval: Duration,
    logger: slog::Logger,
    shutdown: &Shutdown,
) {
    let mut stop = shutdown.register().await;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.stopped() => {
                    slog::debug!(logger, "janitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = uploads.sweep_expired().await {
                        slog::warn!(logger, "upload sweep failed"; "error" => %e);
                    }
                    if let Some(age) = trash_max_age
                        && let Err(e) = pipeline.purge_expired(age).await
                    {
                        slog::warn!(logger, "trash sweep failed"; "error" => %e);
                    }
                }
            }
        }
    });
}

// Rebuild the filtered-tree snapshot wholesale whenever a mutation commits.
async fn spawn_tree_refresh(tree: Arc<TreeCache>, events: Arc<Broadcaster>, logger: slog::Logger, shutdown: &Shutdown) {
    let mut stop = shutdown.register().await;
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.stopped() => return,
                received = rx.recv() => {
                    match received {
                        Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            if let Err(e) = tree.refresh().await {
                                slog::warn!(logger, "tree refresh failed"; "error" => %e);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    });
}
