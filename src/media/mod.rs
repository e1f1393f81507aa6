//! The media processor: a bounded worker pool that reacts to image uploads.
//!
//! For each enqueued path the processor extracts EXIF metadata, renders a thumbnail for
//! raster formats, records pixel dimensions and fans the image out to the enabled tagging
//! plugins. A full queue drops the path with a warning; a background `process_existing`
//! sweep reconciles anything that was dropped or left pending.

pub mod exif;
pub mod plugins;
pub mod store;
pub mod thumb;

pub use store::{Album, ImageMeta, ImageTag, MediaStore, TaggingPlugin};

use crate::error::Result;
use crate::meta::MetaStore;
use crate::routing::StorageRouter;
use crate::server::shutdown::Shutdown;
use slog::o;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Extensions the thumbnailer can decode.
pub const RASTER_THUMB_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Extensions treated as images: the raster set plus formats we only extract metadata from.
pub const IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif", "heic", "raw", "dng", "cr2", "nef", "arw",
];

/// Whether `path` names an image by extension.
pub fn is_image_path(path: &str) -> bool {
    crate::pathutil::extension(path).is_some_and(|ext| IMAGE_EXTS.contains(&ext.as_str()))
}

/// Whether `path` is in the raster set the thumbnailer handles.
pub fn has_raster_thumbnail(path: &str) -> bool {
    crate::pathutil::extension(path).is_some_and(|ext| RASTER_THUMB_EXTS.contains(&ext.as_str()))
}

/// The key a path's thumbnail is stored under.
pub fn thumb_key(storage_key: &str) -> String {
    format!("_thumbs/{storage_key}")
}

/// Cloneable handle for enqueueing paths into the processor.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<String>,
    logger: slog::Logger,
}

impl QueueHandle {
    /// Enqueues a path. Never blocks: when the queue is full the path is dropped with a
    /// warning and the sweep picks it up later.
    pub fn enqueue(&self, path: &str) {
        if let Err(e) = self.tx.try_send(path.to_string()) {
            slog::warn!(self.logger, "media queue full, dropping"; "path" => path, "error" => %e);
        }
    }
}

/// The background image processor.
pub struct Processor {
    store: MediaStore,
    meta: MetaStore,
    router: Arc<StorageRouter>,
    client: reqwest::Client,
    logger: slog::Logger,
}

impl Processor {
    /// Wires a processor to its collaborators.
    pub fn new(store: MediaStore, meta: MetaStore, router: Arc<StorageRouter>, logger: slog::Logger) -> Processor {
        Processor {
            store,
            meta,
            router,
            client: reqwest::Client::new(),
            logger: logger.new(o!("module" => "media")),
        }
    }

    /// The media store, for the HTTP surfaces that read tags and albums.
    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    /// Starts `workers` worker tasks draining a queue of `capacity` paths and returns the
    /// enqueue handle. Each worker finishes the image it is on and exits once shutdown
    /// begins.
    pub async fn spawn(self: Arc<Self>, workers: usize, capacity: usize, shutdown: &Shutdown) -> QueueHandle {
        let (tx, rx) = mpsc::channel::<String>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        for n in 0..workers {
            let worker = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            let mut stop = shutdown.register().await;
            let logger = self.logger.new(o!("worker" => n));
            tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = stop.stopped() => None,
                            path = rx.recv() => path,
                        }
                    };
                    let Some(path) = next else {
                        slog::debug!(logger, "media worker stopping");
                        return;
                    };
                    if let Err(e) = worker.process(&path).await {
                        slog::warn!(logger, "media processing failed"; "path" => &path, "error" => %e);
                    }
                }
            });
        }
        QueueHandle {
            tx,
            logger: self.logger.clone(),
        }
    }

    /// Enqueues every live image lacking a metadata row and every row stuck in `pending`.
    pub async fn process_existing(&self, queue: &QueueHandle) -> Result<usize> {
        let paths = self.store.unprocessed().await?;
        let count = paths.len();
        for path in paths {
            queue.enqueue(&path);
        }
        Ok(count)
    }

    /// Processes one path end to end. Missing EXIF and plugin failures are local recoveries;
    /// only the metadata row write surfaces an error.
    pub async fn process(&self, path: &str) -> Result<()> {
        if !self.store.mark_processing(path).await? {
            // Foreign key violation: the file is gone, nothing to do.
            slog::debug!(self.logger, "skipping vanished file"; "path" => path);
            return Ok(());
        }
        let Some(entry) = self.meta.get_live(path).await? else {
            slog::debug!(self.logger, "skipping trashed file"; "path" => path);
            return Ok(());
        };

        let mut row = ImageMeta {
            path: path.to_string(),
            status: store::STATUS_DONE.to_string(),
            orientation: 1,
            ..ImageMeta::default()
        };

        let backend = self.router.resolve_for_file(entry.location_id.as_deref(), entry.group_id.as_deref())?;
        let bytes = match backend.get_bytes(&entry.storage_key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                slog::warn!(self.logger, "cannot read image content"; "path" => path, "error" => %e);
                row.status = store::STATUS_FAILED.to_string();
                self.store.finish(&row).await?;
                return Ok(());
            }
        };

        let summary = exif::extract(&bytes);
        row.camera_make = summary.make.clone();
        row.camera_model = summary.model.clone();
        row.lens = summary.lens.clone();
        row.focal_length = summary.focal_length;
        row.aperture = summary.aperture;
        row.shutter = summary.shutter.clone();
        row.iso = summary.iso;
        row.flash = summary.flash;
        row.taken_at = summary.taken_at;
        row.gps_lat = summary.gps_lat;
        row.gps_lon = summary.gps_lon;
        row.gps_alt = summary.gps_alt;
        row.orientation = summary.orientation as i64;

        let mut decoded_dims = None;
        if has_raster_thumbnail(path) {
            match thumb::render(&bytes, summary.orientation) {
                Ok(jpeg) => {
                    decoded_dims = thumb::dimensions(&bytes);
                    if let Err(e) = backend.put_bytes(&thumb_key(&entry.storage_key), jpeg.into()).await {
                        slog::warn!(self.logger, "thumbnail store failed"; "path" => path, "error" => %e);
                        row.status = store::STATUS_FAILED.to_string();
                    }
                }
                Err(e) => {
                    slog::warn!(self.logger, "thumbnail render failed"; "path" => path, "error" => %e);
                    row.status = store::STATUS_FAILED.to_string();
                }
            }
        }

        // EXIF dimensions win; the decoded size is the fallback.
        let (width, height) = match (summary.width, summary.height) {
            (Some(w), Some(h)) => (Some(w), Some(h)),
            _ => match decoded_dims.or_else(|| thumb::dimensions(&bytes)) {
                Some((w, h)) => (Some(w), Some(h)),
                None => (None, None),
            },
        };
        row.width = width.map(|w| w as i64);
        row.height = height.map(|h| h as i64);

        self.store.finish(&row).await?;
        self.fan_out_plugins(&entry.path, entry.size).await;
        Ok(())
    }

    // Call each enabled plugin; failures land on the plugin's health field and never abort
    // the remaining calls.
    async fn fan_out_plugins(&self, path: &str, size: i64) {
        let plugin_list = match self.store.enabled_plugins().await {
            Ok(list) => list,
            Err(e) => {
                slog::warn!(self.logger, "cannot list plugins"; "error" => %e);
                return;
            }
        };
        if plugin_list.is_empty() {
            return;
        }
        let request = plugins::PluginRequest {
            file_path: path.to_string(),
            file_name: crate::pathutil::name_of(path).to_string(),
            content_type: crate::mime::from_path(path).to_string(),
            size,
            image_url: format!("/api/v1/content{path}"),
        };
        for plugin in plugin_list {
            match plugins::call(&self.client, &plugin, &request).await {
                Ok(tags) => {
                    let source = format!("plugin:{}", plugin.name);
                    let pairs: Vec<(String, f64)> = tags.into_iter().map(|t| (t.tag, t.confidence)).collect();
                    if let Err(e) = self.store.replace_tags(path, &source, &pairs).await {
                        slog::warn!(self.logger, "tag store failed"; "path" => path, "plugin" => &plugin.name, "error" => %e);
                    }
                    let _ = self.store.set_plugin_error(&plugin.name, None).await;
                }
                Err(message) => {
                    slog::warn!(self.logger, "plugin call failed"; "plugin" => &plugin.name, "error" => &message);
                    let _ = self.store.set_plugin_error(&plugin.name, Some(&message)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FileEntry, connect_memory};
    use haven_core::storage::ObjectStore;
    use haven_sbe_mem::InMemory;
    use pretty_assertions::assert_eq;

    #[test]
    fn image_extension_sets() {
        assert!(is_image_path("/a/cat.JPG"));
        assert!(is_image_path("/a/shot.dng"));
        assert!(!is_image_path("/a/notes.txt"));
        assert!(has_raster_thumbnail("/a/cat.png"));
        assert!(!has_raster_thumbnail("/a/shot.dng"));
    }

    async fn fixture() -> (Processor, MetaStore, Arc<InMemory>) {
        let pool = connect_memory().await.unwrap();
        let logger = slog::Logger::root(slog::Discard, o!());
        let meta = MetaStore::new(pool.clone(), logger.clone());
        let backend = Arc::new(InMemory::new());
        let router = Arc::new(StorageRouter::new(backend.clone() as Arc<dyn ObjectStore>));
        let processor = Processor::new(MediaStore::new(pool), meta.clone(), router, logger);
        (processor, meta, backend)
    }

    #[tokio::test]
    async fn processes_a_png_end_to_end() {
        let (processor, meta, backend) = fixture().await;
        let png = thumb::tests::tiny_png();
        backend.put_bytes("pics/tiny.png", png.clone().into()).await.unwrap();
        meta.ensure_ancestors("/pics/tiny.png").await.unwrap();
        meta.upsert(&FileEntry::file("/pics/tiny.png", png.len() as i64, "h".into(), Some("u1".into()), None))
            .await
            .unwrap();

        processor.process("/pics/tiny.png").await.unwrap();

        let row = processor.store().get("/pics/tiny.png").await.unwrap().unwrap();
        assert_eq!(row.status, store::STATUS_DONE);
        assert_eq!(row.orientation, 1);
        assert_eq!(row.width, Some(8));
        assert_eq!(row.height, Some(4));
        assert!(backend.exists("_thumbs/pics/tiny.png").await.unwrap());
    }

    #[tokio::test]
    async fn undecodable_raster_is_marked_failed() {
        let (processor, meta, backend) = fixture().await;
        backend.put_bytes("pics/broken.jpg", bytes::Bytes::from_static(b"nope")).await.unwrap();
        meta.ensure_ancestors("/pics/broken.jpg").await.unwrap();
        meta.upsert(&FileEntry::file("/pics/broken.jpg", 4, "h".into(), Some("u1".into()), None))
            .await
            .unwrap();

        processor.process("/pics/broken.jpg").await.unwrap();

        let row = processor.store().get("/pics/broken.jpg").await.unwrap().unwrap();
        assert_eq!(row.status, store::STATUS_FAILED);
        assert!(!backend.exists("_thumbs/pics/broken.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn vanished_file_is_skipped() {
        let (processor, _meta, _backend) = fixture().await;
        // No files row at all: the foreign key stops the metadata row and processing skips.
        processor.process("/pics/ghost.jpg").await.unwrap();
        assert!(processor.store().get("/pics/ghost.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_finds_missing_rows() {
        let (processor, meta, backend) = fixture().await;
        let png = thumb::tests::tiny_png();
        backend.put_bytes("p/a.png", png.clone().into()).await.unwrap();
        meta.ensure_ancestors("/p/a.png").await.unwrap();
        meta.upsert(&FileEntry::file("/p/a.png", png.len() as i64, "h".into(), Some("u1".into()), None))
            .await
            .unwrap();
        meta.upsert(&FileEntry::file("/p/readme.txt", 1, "h".into(), Some("u1".into()), None))
            .await
            .unwrap();

        let unprocessed = processor.store().unprocessed().await.unwrap();
        assert_eq!(unprocessed, vec!["/p/a.png".to_string()]);
    }
}
