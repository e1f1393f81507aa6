//! Pre-flight storage-quota and upload-size admission, plus daily bandwidth accounting.

use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use slog::o;
use sqlx::sqlite::SqlitePool;

/// A user's configured limits. Zero means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Quota {
    /// The user the limits apply to.
    pub user_id: String,
    /// Ceiling on total live bytes owned; `0` = unlimited.
    pub max_storage_bytes: i64,
    /// Per-request upload ceiling overriding the process default; `0` = use the default.
    pub max_upload_bytes: i64,
}

/// Admission gate consulted before any write reaches the pipeline.
#[derive(Clone)]
pub struct Gate {
    pool: SqlitePool,
    default_upload_limit: i64,
    logger: slog::Logger,
}

impl Gate {
    /// Creates a gate with the process-wide upload size default.
    pub fn new(pool: SqlitePool, default_upload_limit: i64, logger: slog::Logger) -> Gate {
        Gate {
            pool,
            default_upload_limit,
            logger: logger.new(o!("module" => "quota")),
        }
    }

    /// The configured quota row for `user`, if any.
    pub async fn get_quota(&self, user: &str) -> Result<Option<Quota>> {
        let quota = sqlx::query_as::<_, Quota>("SELECT user_id, max_storage_bytes, max_upload_bytes FROM quotas WHERE user_id = ?")
            .bind(user)
            .fetch_optional(&self.pool)
            .await?;
        Ok(quota)
    }

    /// Sets (or replaces) a user's limits.
    pub async fn set_quota(&self, user: &str, max_storage_bytes: i64, max_upload_bytes: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO quotas (user_id, max_storage_bytes, max_upload_bytes) VALUES (?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                 max_storage_bytes = excluded.max_storage_bytes,
                 max_upload_bytes = excluded.max_upload_bytes",
        )
        .bind(user)
        .bind(max_storage_bytes)
        .bind(max_upload_bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The effective per-request upload ceiling for `user`.
    pub async fn upload_size_limit(&self, user: &str) -> Result<i64> {
        let quota = self.get_quota(user).await?;
        Ok(match quota {
            Some(q) if q.max_upload_bytes > 0 => q.max_upload_bytes,
            _ => self.default_upload_limit,
        })
    }

    /// Admits or rejects `additional` bytes against the user's storage ceiling.
    pub async fn check_storage_quota(&self, user: &str, additional: i64) -> Result<()> {
        let Some(quota) = self.get_quota(user).await? else {
            return Ok(());
        };
        if quota.max_storage_bytes == 0 {
            return Ok(());
        }
        let (used,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(size), 0) FROM files WHERE owner = ? AND is_dir = 0 AND deleted_at IS NULL",
        )
        .bind(user)
        .fetch_one(&self.pool)
        .await?;
        if used + additional > quota.max_storage_bytes {
            slog::debug!(self.logger, "storage quota exceeded"; "user" => user, "used" => used, "additional" => additional);
            return Err(Error::PayloadTooLarge(format!(
                "storage quota exceeded: {used} + {additional} > {}",
                quota.max_storage_bytes
            )));
        }
        Ok(())
    }

    /// Adds to today's bandwidth bucket for `user`.
    pub async fn track_bandwidth(&self, user: &str, up: i64, down: i64) -> Result<()> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        sqlx::query(
            "INSERT INTO bandwidth_usage (user_id, day, bytes_up, bytes_down) VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id, day) DO UPDATE SET
                 bytes_up = bandwidth_usage.bytes_up + excluded.bytes_up,
                 bytes_down = bandwidth_usage.bytes_down + excluded.bytes_down",
        )
        .bind(user)
        .bind(day)
        .bind(up)
        .bind(down)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Today's `(up, down)` byte counters for `user`.
    pub async fn bandwidth_today(&self, user: &str) -> Result<(i64, i64)> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let row: Option<(i64, i64)> = sqlx::query_as("SELECT bytes_up, bytes_down FROM bandwidth_usage WHERE user_id = ? AND day = ?")
            .bind(user)
            .bind(day)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.unwrap_or((0, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FileEntry, MetaStore, connect_memory};
    use pretty_assertions::assert_eq;

    async fn fixtures() -> (MetaStore, Gate) {
        let pool = connect_memory().await.unwrap();
        let logger = slog::Logger::root(slog::Discard, o!());
        (MetaStore::new(pool.clone(), logger.clone()), Gate::new(pool, 512, logger))
    }

    #[tokio::test]
    async fn boundary_of_storage_quota() {
        let (meta, gate) = fixtures().await;
        gate.set_quota("u1", 100, 0).await.unwrap();
        meta.upsert(&FileEntry::file("/big.bin", 90, "h".into(), Some("u1".into()), None))
            .await
            .unwrap();

        // Exactly at the ceiling is admitted; one byte more is not.
        gate.check_storage_quota("u1", 10).await.unwrap();
        let err = gate.check_storage_quota("u1", 11).await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn zero_quota_is_unlimited() {
        let (_meta, gate) = fixtures().await;
        gate.set_quota("u1", 0, 0).await.unwrap();
        gate.check_storage_quota("u1", i64::MAX / 2).await.unwrap();
        // No quota row at all is unlimited too.
        gate.check_storage_quota("nobody", 1 << 40).await.unwrap();
    }

    #[tokio::test]
    async fn upload_limit_override() {
        let (_meta, gate) = fixtures().await;
        assert_eq!(gate.upload_size_limit("u1").await.unwrap(), 512);
        gate.set_quota("u1", 0, 2048).await.unwrap();
        assert_eq!(gate.upload_size_limit("u1").await.unwrap(), 2048);
    }

    #[tokio::test]
    async fn bandwidth_buckets_accumulate() {
        let (_meta, gate) = fixtures().await;
        gate.track_bandwidth("u1", 100, 5).await.unwrap();
        gate.track_bandwidth("u1", 20, 0).await.unwrap();
        assert_eq!(gate.bandwidth_today("u1").await.unwrap(), (120, 5));
    }
}
