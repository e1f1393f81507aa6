//! Persistence for the media plane: image metadata rows, tags, plugins and albums.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

/// Processing states of an image metadata row.
pub const STATUS_PENDING: &str = "pending";
/// The row is being worked on.
pub const STATUS_PROCESSING: &str = "processing";
/// Extraction finished.
pub const STATUS_DONE: &str = "done";
/// Extraction failed; the sweep will not retry automatically.
pub const STATUS_FAILED: &str = "failed";

/// The extracted metadata of one image, keyed by its live path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageMeta {
    /// Path of the image file.
    pub path: String,
    /// One of the `STATUS_*` states.
    pub status: String,
    /// EXIF camera make.
    pub camera_make: Option<String>,
    /// EXIF camera model.
    pub camera_model: Option<String>,
    /// EXIF lens model.
    pub lens: Option<String>,
    /// Focal length in millimetres.
    pub focal_length: Option<f64>,
    /// Aperture as an f-number.
    pub aperture: Option<f64>,
    /// Shutter speed as recorded, e.g. `1/250`.
    pub shutter: Option<String>,
    /// ISO speed.
    pub iso: Option<i64>,
    /// Whether the flash fired.
    pub flash: Option<bool>,
    /// When the photo was taken.
    pub taken_at: Option<DateTime<Utc>>,
    /// GPS latitude in decimal degrees.
    pub gps_lat: Option<f64>,
    /// GPS longitude in decimal degrees.
    pub gps_lon: Option<f64>,
    /// GPS altitude in metres.
    pub gps_alt: Option<f64>,
    /// EXIF orientation, 1–8; 1 when absent.
    pub orientation: i64,
    /// Pixel width.
    pub width: Option<i64>,
    /// Pixel height.
    pub height: Option<i64>,
    /// When processing last finished.
    pub processed_at: Option<DateTime<Utc>>,
}

/// A tag attached to an image.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageTag {
    /// Path of the tagged image.
    pub path: String,
    /// The tag itself.
    pub tag: String,
    /// Confidence reported by the tagger.
    pub confidence: f64,
    /// `user` or `plugin:<name>`.
    pub source: String,
}

/// A registered tagging plugin.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaggingPlugin {
    /// Unique plugin name.
    pub name: String,
    /// Webhook URL invoked per processed image.
    pub url: String,
    /// Whether the plugin participates in fan-out.
    pub enabled: bool,
    /// Opaque configuration blob forwarded to the plugin.
    pub config: String,
    /// Last call failure, for health reporting.
    pub last_error: Option<String>,
}

/// A user-curated album.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Album {
    /// Album id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Store over the media tables. Cheap to clone.
#[derive(Clone)]
pub struct MediaStore {
    pool: SqlitePool,
}

impl MediaStore {
    /// Creates the store over the shared pool.
    pub fn new(pool: SqlitePool) -> MediaStore {
        MediaStore { pool }
    }

    /// Marks `path` as processing, creating a pending row first if absent. Returns `false`
    /// when the file row is gone (foreign key violation), in which case processing is skipped.
    pub async fn mark_processing(&self, path: &str) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO image_metadata (path, status) VALUES (?, ?)
             ON CONFLICT (path) DO UPDATE SET status = ?",
        )
        .bind(path)
        .bind(STATUS_PROCESSING)
        .bind(STATUS_PROCESSING)
        .execute(&self.pool)
        .await;
        match inserted {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.message().contains("FOREIGN KEY") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the extracted metadata and stamps the row `done` (or `failed`).
    pub async fn finish(&self, meta: &ImageMeta) -> Result<()> {
        sqlx::query(
            "UPDATE image_metadata SET
                 status = ?, camera_make = ?, camera_model = ?, lens = ?, focal_length = ?,
                 aperture = ?, shutter = ?, iso = ?, flash = ?, taken_at = ?,
                 gps_lat = ?, gps_lon = ?, gps_alt = ?, orientation = ?, width = ?, height = ?,
                 processed_at = ?
             WHERE path = ?",
        )
        .bind(&meta.status)
        .bind(&meta.camera_make)
        .bind(&meta.camera_model)
        .bind(&meta.lens)
        .bind(meta.focal_length)
        .bind(meta.aperture)
        .bind(&meta.shutter)
        .bind(meta.iso)
        .bind(meta.flash)
        .bind(meta.taken_at)
        .bind(meta.gps_lat)
        .bind(meta.gps_lon)
        .bind(meta.gps_alt)
        .bind(meta.orientation)
        .bind(meta.width)
        .bind(meta.height)
        .bind(Utc::now())
        .bind(&meta.path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The metadata row for `path`, if one exists.
    pub async fn get(&self, path: &str) -> Result<Option<ImageMeta>> {
        let row = sqlx::query_as::<_, ImageMeta>("SELECT * FROM image_metadata WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Paths needing (re)processing: live image files without a metadata row, plus rows stuck
    /// in `pending`.
    pub async fn unprocessed(&self) -> Result<Vec<String>> {
        let missing: Vec<(String,)> = sqlx::query_as(
            "SELECT f.path FROM files f
             LEFT JOIN image_metadata im ON im.path = f.path
             WHERE f.is_dir = 0 AND f.deleted_at IS NULL AND im.path IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        let stuck: Vec<(String,)> = sqlx::query_as("SELECT path FROM image_metadata WHERE status = ?")
            .bind(STATUS_PENDING)
            .fetch_all(&self.pool)
            .await?;
        let mut out: Vec<String> = missing
            .into_iter()
            .map(|(p,)| p)
            .filter(|p| super::is_image_path(p))
            .collect();
        out.extend(stuck.into_iter().map(|(p,)| p));
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Replaces the tags from one source on `path`. Tags below the confidence floor are
    /// dropped by the caller.
    pub async fn replace_tags(&self, path: &str, source: &str, tags: &[(String, f64)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM image_tags WHERE path = ? AND source = ?")
            .bind(path)
            .bind(source)
            .execute(&mut *tx)
            .await?;
        for (tag, confidence) in tags {
            sqlx::query("INSERT INTO image_tags (path, tag, confidence, source) VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING")
                .bind(path)
                .bind(tag)
                .bind(confidence)
                .bind(source)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// All tags on `path`.
    pub async fn tags(&self, path: &str) -> Result<Vec<ImageTag>> {
        let rows = sqlx::query_as::<_, ImageTag>("SELECT * FROM image_tags WHERE path = ? ORDER BY tag")
            .bind(path)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Adds a user tag with full confidence.
    pub async fn add_user_tag(&self, path: &str, tag: &str) -> Result<()> {
        sqlx::query("INSERT INTO image_tags (path, tag, confidence, source) VALUES (?, ?, 1.0, 'user') ON CONFLICT DO NOTHING")
            .bind(path)
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Plugins currently enabled for fan-out.
    pub async fn enabled_plugins(&self) -> Result<Vec<TaggingPlugin>> {
        let rows = sqlx::query_as::<_, TaggingPlugin>("SELECT * FROM tagging_plugins WHERE enabled = 1 ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Registers or updates a plugin.
    pub async fn upsert_plugin(&self, plugin: &TaggingPlugin) -> Result<()> {
        sqlx::query(
            "INSERT INTO tagging_plugins (name, url, enabled, config, last_error) VALUES (?, ?, ?, ?, NULL)
             ON CONFLICT (name) DO UPDATE SET url = excluded.url, enabled = excluded.enabled, config = excluded.config",
        )
        .bind(&plugin.name)
        .bind(&plugin.url)
        .bind(plugin.enabled)
        .bind(&plugin.config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records a call failure on the plugin's health field; `None` clears it.
    pub async fn set_plugin_error(&self, name: &str, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE tagging_plugins SET last_error = ? WHERE name = ?")
            .bind(error)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Creates an album and returns its id.
    pub async fn create_album(&self, user: &str, name: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO user_albums (id, user_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(user)
            .bind(name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    /// The user's albums, newest first.
    pub async fn albums(&self, user: &str) -> Result<Vec<Album>> {
        let rows = sqlx::query_as::<_, Album>("SELECT * FROM user_albums WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Adds an image to an album.
    pub async fn add_album_image(&self, album: &str, path: &str) -> Result<()> {
        sqlx::query("INSERT INTO album_images (album_id, path) VALUES (?, ?) ON CONFLICT DO NOTHING")
            .bind(album)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Paths in an album.
    pub async fn album_images(&self, album: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT path FROM album_images WHERE album_id = ? ORDER BY path")
            .bind(album)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }
}
