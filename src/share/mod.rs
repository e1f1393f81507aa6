//! Share links: capability tokens granting unauthenticated download of a path under optional
//! password, expiry and download-count constraints.
//!
//! The engine owns only its own table; the caller streams the bytes after validation and
//! increments the download counter once the response stream has started.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use slog::o;
use sqlx::sqlite::SqlitePool;

/// A share link row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ShareLink {
    /// Token (128-bit random, hex).
    pub id: String,
    /// Path the link grants access to.
    pub path: String,
    /// User who created the link.
    pub created_by: String,
    /// bcrypt hash of the optional password; never serialized.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Download ceiling; `0` = unlimited.
    pub max_downloads: i64,
    /// Downloads served so far.
    pub download_count: i64,
    /// `false` once revoked.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ShareLink {
    /// Whether a password is required to use this link.
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// The share link engine.
#[derive(Clone)]
pub struct ShareLinks {
    pool: SqlitePool,
    logger: slog::Logger,
}

impl ShareLinks {
    /// Creates the engine over the shared pool.
    pub fn new(pool: SqlitePool, logger: slog::Logger) -> ShareLinks {
        ShareLinks {
            pool,
            logger: logger.new(o!("module" => "share")),
        }
    }

    /// Creates a link for `path`. A supplied password is stored as a bcrypt hash; an expiry
    /// is set when `expires_in_s > 0`.
    pub async fn create(
        &self,
        path: &str,
        user: &str,
        password: Option<&str>,
        expires_in_s: Option<i64>,
        max_downloads: Option<i64>,
    ) -> Result<ShareLink> {
        let password_hash = match password {
            Some(pw) if !pw.is_empty() => {
                let pw = pw.to_string();
                let hash = tokio::task::spawn_blocking(move || bcrypt::hash(pw, bcrypt::DEFAULT_COST))
                    .await
                    .map_err(|e| Error::Internal(format!("hash task: {e}")))?
                    .map_err(|e| Error::Internal(format!("bcrypt: {e}")))?;
                Some(hash)
            }
            _ => None,
        };
        let link = ShareLink {
            id: uuid::Uuid::new_v4().simple().to_string(),
            path: path.to_string(),
            created_by: user.to_string(),
            password_hash,
            expires_at: expires_in_s.filter(|s| *s > 0).map(|s| Utc::now() + Duration::seconds(s)),
            max_downloads: max_downloads.unwrap_or(0),
            download_count: 0,
            active: true,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO share_links (id, path, created_by, password_hash, expires_at, max_downloads, download_count, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, 1, ?)",
        )
        .bind(&link.id)
        .bind(&link.path)
        .bind(&link.created_by)
        .bind(&link.password_hash)
        .bind(link.expires_at)
        .bind(link.max_downloads)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;
        slog::info!(self.logger, "share link created"; "path" => path, "user" => user, "expires" => ?link.expires_at);
        Ok(link)
    }

    /// A link by its token.
    pub async fn get(&self, id: &str) -> Result<Option<ShareLink>> {
        let link = sqlx::query_as::<_, ShareLink>("SELECT * FROM share_links WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(link)
    }

    /// Validates a token for download: the link must exist, be active, not be expired, have
    /// download headroom, and the password (if any) must match.
    pub async fn validate(&self, id: &str, password: Option<&str>) -> Result<ShareLink> {
        let link = self.get(id).await?.ok_or_else(|| Error::not_found("share link"))?;
        if !link.active {
            return Err(Error::forbidden("share link revoked"));
        }
        if let Some(expires) = link.expires_at
            && expires < Utc::now()
        {
            return Err(Error::forbidden("share link expired"));
        }
        if link.max_downloads > 0 && link.download_count >= link.max_downloads {
            return Err(Error::forbidden("share link download limit reached"));
        }
        if let Some(hash) = &link.password_hash {
            let Some(pw) = password else {
                return Err(Error::forbidden("share link requires a password"));
            };
            let pw = pw.to_string();
            let hash = hash.clone();
            let ok = tokio::task::spawn_blocking(move || bcrypt::verify(pw, &hash))
                .await
                .map_err(|e| Error::Internal(format!("verify task: {e}")))?
                .map_err(|e| Error::Internal(format!("bcrypt: {e}")))?;
            if !ok {
                return Err(Error::forbidden("invalid share link password"));
            }
        }
        Ok(link)
    }

    /// Atomically bumps the download counter. Called only after the response stream has been
    /// initiated.
    pub async fn increment_downloads(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE share_links SET download_count = download_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deactivates a link.
    pub async fn revoke(&self, id: &str) -> Result<()> {
        let res = sqlx::query("UPDATE share_links SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::not_found("share link"));
        }
        Ok(())
    }

    /// Links created by `user`.
    pub async fn list_by_user(&self, user: &str) -> Result<Vec<ShareLink>> {
        let rows = sqlx::query_as::<_, ShareLink>("SELECT * FROM share_links WHERE created_by = ? ORDER BY created_at DESC")
            .bind(user)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Links pointing at `path`.
    pub async fn list_by_path(&self, path: &str) -> Result<Vec<ShareLink>> {
        let rows = sqlx::query_as::<_, ShareLink>("SELECT * FROM share_links WHERE path = ? ORDER BY created_at DESC")
            .bind(path)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Every link, optionally only the active ones.
    pub async fn list_all(&self, active_only: bool) -> Result<Vec<ShareLink>> {
        let sql = if active_only {
            "SELECT * FROM share_links WHERE active = 1 ORDER BY created_at DESC"
        } else {
            "SELECT * FROM share_links ORDER BY created_at DESC"
        };
        let rows = sqlx::query_as::<_, ShareLink>(sql).fetch_all(&self.pool).await?;
        Ok(rows)
    }
}
