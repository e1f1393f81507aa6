//! The ordered write pipeline: upload → content put → version snapshot → metadata upsert →
//! event publish.
//!
//! The pipeline couples a content back-end with the versioned metadata store under optimistic
//! concurrency. There is no transactional wrapper around the read-modify-write of an entry:
//! two concurrent writers to the same path may both snapshot and both bump the version; last
//! write wins and both versions stay retrievable. Well-behaved clients avoid the race with the
//! expected-version / expected-hash conflict headers.
//!
//! Failure semantics (per step): a failed snapshot row aborts the write; a failed back-end
//! version copy is logged and tolerated; a failed content put aborts with the metadata
//! untouched; a failed upsert aborts after the bytes were written, and retrying is the
//! expected recovery since the put is idempotent.

use crate::auth::Claims;
use crate::error::{Error, Result};
use crate::media::QueueHandle;
use crate::meta::{FileEntry, MetaStore, PurgedObject, Visibility};
use crate::notify::{Broadcaster, Event, EventKind};
use crate::pathutil;
use crate::perm::{Evaluator, Level};
use crate::quota::Gate;
use crate::routing::StorageRouter;
use bytes::Bytes;
use chrono::Utc;
use haven_core::storage::{ErrorKind as StorageErrorKind, ObjectRead};
use serde::Serialize;
use sha2::{Digest, Sha256};
use slog::o;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// The result of a successful write.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    /// The entry row after the write.
    #[serde(flatten)]
    pub entry: FileEntry,
    /// Whether this was the first upload at the path.
    pub created: bool,
}

/// The result of a version rollback.
#[derive(Debug, Clone, Serialize)]
pub struct Rollback {
    /// The version whose bytes were restored.
    pub restored_version: i64,
    /// The version the file carries now.
    pub new_version: i64,
}

/// Orchestrates writes, reads, deletes, rollbacks, moves and purges across the router, the
/// metadata store, the quota gate and the broadcaster.
#[derive(Clone)]
pub struct WritePipeline {
    meta: MetaStore,
    router: Arc<StorageRouter>,
    perms: Evaluator,
    gate: Gate,
    events: Arc<Broadcaster>,
    media: Option<QueueHandle>,
    logger: slog::Logger,
}

impl WritePipeline {
    /// Wires the pipeline to its collaborators.
    pub fn new(
        meta: MetaStore,
        router: Arc<StorageRouter>,
        perms: Evaluator,
        gate: Gate,
        events: Arc<Broadcaster>,
        media: Option<QueueHandle>,
        logger: slog::Logger,
    ) -> WritePipeline {
        WritePipeline {
            meta,
            router,
            perms,
            gate,
            events,
            media,
            logger: logger.new(o!("module" => "pipeline")),
        }
    }

    /// The metadata store this pipeline commits to.
    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// The permission evaluator used for admission.
    pub fn perms(&self) -> &Evaluator {
        &self.perms
    }

    /// The quota gate used for admission.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Single-shot write of an in-memory body. Enforces permissions, the effective upload
    /// size limit, the storage quota and the optional conflict headers, then runs the commit
    /// sequence.
    pub async fn write(
        &self,
        claims: &Claims,
        path: &str,
        body: Bytes,
        expected_version: Option<i64>,
        expected_hash: Option<&str>,
    ) -> Result<WriteOutcome> {
        if !self.perms.check(&claims.user_id, path, Level::Write, claims.is_admin).await? {
            return Err(Error::forbidden(format!("write access to {path} denied")));
        }
        let limit = self.gate.upload_size_limit(&claims.user_id).await?;
        if body.len() as i64 > limit {
            return Err(Error::PayloadTooLarge(format!("upload of {} bytes exceeds limit {limit}", body.len())));
        }
        self.gate.check_storage_quota(&claims.user_id, body.len() as i64).await?;

        let hash = hex::encode(Sha256::digest(&body));
        let size = body.len() as i64;
        let reader = Box::new(std::io::Cursor::new(body));
        self.commit(claims, path, size, hash, reader, expected_version, expected_hash).await
    }

    /// Steps 5–11 of a write: conflict detection, version snapshot, content put, ancestor
    /// directories, metadata upsert, event publish and media enqueue. The chunked upload
    /// manager enters here with a streamed body and a precomputed hash.
    pub(crate) async fn commit(
        &self,
        claims: &Claims,
        path: &str,
        size: i64,
        hash: String,
        body: Box<dyn AsyncRead + Send + Sync + Unpin>,
        expected_version: Option<i64>,
        expected_hash: Option<&str>,
    ) -> Result<WriteOutcome> {
        let prior = self.meta.get(path).await?;
        if let Some(prior) = &prior {
            if prior.is_dir {
                return Err(Error::bad_request(format!("{path} is a directory")));
            }
            if let Some(expected) = expected_version
                && expected != prior.version
            {
                return Err(Error::Conflict {
                    path: path.to_string(),
                    expected_version: expected,
                    current_version: prior.version,
                    current_hash: prior.hash.clone(),
                });
            }
            if let Some(expected) = expected_hash
                && expected != prior.hash
            {
                return Err(Error::Conflict {
                    path: path.to_string(),
                    expected_version: expected_version.unwrap_or(prior.version),
                    current_version: prior.version,
                    current_hash: prior.hash.clone(),
                });
            }
            // Snapshot the row first; only then back the bytes up. A failed row snapshot
            // aborts, a failed byte copy is best-effort history.
            self.meta.save_version(path).await?;
            let backend = self.router.resolve_for_file(prior.location_id.as_deref(), prior.group_id.as_deref())?;
            let backup_key = format!("_versions/{}/{}", prior.storage_key, prior.version);
            if let Err(e) = backend.copy(&prior.storage_key, &backup_key).await {
                slog::warn!(self.logger, "version content backup failed"; "path" => path, "version" => prior.version, "error" => %e);
            }
        }

        let group_id = match &prior {
            Some(p) => p.group_id.clone(),
            None => self.inherited_group(path).await?,
        };
        let (backend, location_id) = self.router.resolve_for_upload(group_id.as_deref())?;
        let key = pathutil::storage_key(path);
        backend.put(&key, body, size as u64).await?;

        self.meta.ensure_ancestors(path).await?;
        let mut entry = FileEntry::file(path, size, hash, Some(claims.user_id.clone()), Some(location_id));
        entry.version = prior.as_ref().map(|p| p.version + 1).unwrap_or(1);
        entry.group_id = group_id;
        self.meta.upsert(&entry).await?;
        let entry = self
            .meta
            .get_live(path)
            .await?
            .ok_or_else(|| Error::Internal(format!("row vanished after upsert of {path}")))?;

        let created = prior.is_none();
        let kind = if created { EventKind::Create } else { EventKind::Modify };
        self.events
            .publish(Event::new(kind, path, entry.version, entry.hash.clone(), size, &claims.user_id));
        if crate::media::is_image_path(path)
            && let Some(media) = &self.media
        {
            media.enqueue(path);
        }
        if let Err(e) = self.gate.track_bandwidth(&claims.user_id, size, 0).await {
            slog::warn!(self.logger, "bandwidth tracking failed"; "error" => %e);
        }
        if let Err(e) = self.meta.record_activity(&claims.user_id, if created { "create" } else { "modify" }, path, "").await {
            slog::warn!(self.logger, "activity log append failed"; "error" => %e);
        }
        Ok(WriteOutcome { entry, created })
    }

    // New files join their nearest ancestor's group so group routing and group visibility
    // follow the directory they land in.
    async fn inherited_group(&self, path: &str) -> Result<Option<String>> {
        for ancestor in pathutil::ancestors(path) {
            if let Some(dir) = self.meta.get_live(&ancestor).await?
                && dir.group_id.is_some()
            {
                return Ok(dir.group_id);
            }
        }
        Ok(None)
    }

    /// Creates a directory (and any missing ancestors).
    pub async fn mkdir(&self, claims: &Claims, path: &str) -> Result<FileEntry> {
        if !self.perms.check(&claims.user_id, path, Level::Write, claims.is_admin).await? {
            return Err(Error::forbidden(format!("write access to {path} denied")));
        }
        if let Some(existing) = self.meta.get_live(path).await? {
            if existing.is_dir {
                return Ok(existing);
            }
            return Err(Error::bad_request(format!("{path} exists and is a file")));
        }
        self.meta.ensure_ancestors(path).await?;
        let mut dir = FileEntry::directory(path);
        dir.owner = Some(claims.user_id.clone());
        self.meta.upsert(&dir).await?;
        self.events.publish(Event::new(EventKind::Create, path, 0, "", 0, &claims.user_id));
        Ok(dir)
    }

    /// The live entry at `path`, gated on read permission.
    pub async fn stat(&self, claims: &Claims, path: &str) -> Result<FileEntry> {
        if !self.perms.check(&claims.user_id, path, Level::Read, claims.is_admin).await? {
            return Err(Error::forbidden(format!("read access to {path} denied")));
        }
        self.meta
            .get_live(path)
            .await?
            .ok_or_else(|| Error::not_found(path.to_string()))
    }

    /// Opens a byte range of the file at `path`. `range` is `(offset, length)` with `0` length
    /// meaning the remainder.
    pub async fn read(&self, claims: &Claims, path: &str, range: Option<(u64, u64)>) -> Result<(FileEntry, ObjectRead)> {
        if !self.perms.check(&claims.user_id, path, Level::Read, claims.is_admin).await? {
            return Err(Error::forbidden(format!("read access to {path} denied")));
        }
        let entry = self
            .meta
            .get_live(path)
            .await?
            .ok_or_else(|| Error::not_found(path.to_string()))?;
        if entry.is_dir {
            return Err(Error::bad_request(format!("{path} is a directory")));
        }
        let backend = self.router.resolve_for_file(entry.location_id.as_deref(), entry.group_id.as_deref())?;
        let (offset, length) = range.unwrap_or((0, 0));
        let read = backend.get(&entry.storage_key, offset, length).await?;
        Ok((entry, read))
    }

    /// Reads the bytes of a historical version from its backup key.
    pub async fn read_version(&self, claims: &Claims, path: &str, version: i64) -> Result<(crate::meta::VersionRecord, ObjectRead)> {
        if !self.perms.check(&claims.user_id, path, Level::Read, claims.is_admin).await? {
            return Err(Error::forbidden(format!("read access to {path} denied")));
        }
        let record = self
            .meta
            .get_version(path, version)
            .await?
            .ok_or_else(|| Error::not_found(format!("version {version} of {path}")))?;
        let backend = self.router.resolve_for_file(record.location_id.as_deref(), None)?;
        let read = backend.get(&record.backup_key(), 0, 0).await.map_err(|e| {
            if e.kind() == StorageErrorKind::KeyNotFound {
                Error::not_found(format!("content of version {version} of {path} was not backed up"))
            } else {
                e.into()
            }
        })?;
        Ok((record, read))
    }

    /// Soft-deletes `path` and its descendants. Requires ownership, an `owner` grant or admin.
    pub async fn delete(&self, claims: &Claims, path: &str) -> Result<u64> {
        if !self.perms.check(&claims.user_id, path, Level::Owner, claims.is_admin).await? {
            return Err(Error::forbidden(format!("delete of {path} denied")));
        }
        let affected = self.meta.soft_delete(path, &claims.user_id).await?;
        if affected == 0 {
            return Err(Error::not_found(path.to_string()));
        }
        self.events.publish(Event::new(EventKind::Delete, path, 0, "", 0, &claims.user_id));
        if let Err(e) = self.meta.record_activity(&claims.user_id, "delete", path, "").await {
            slog::warn!(self.logger, "activity log append failed"; "error" => %e);
        }
        Ok(affected)
    }

    /// Restores a trashed subtree to its original paths.
    pub async fn restore(&self, claims: &Claims, path: &str) -> Result<u64> {
        if !self.perms.check(&claims.user_id, path, Level::Write, claims.is_admin).await? {
            return Err(Error::forbidden(format!("restore of {path} denied")));
        }
        let affected = self.meta.restore(path).await?;
        if affected == 0 {
            return Err(Error::not_found(format!("{path} is not in the trash")));
        }
        self.events.publish(Event::new(EventKind::Create, path, 0, "", 0, &claims.user_id));
        Ok(affected)
    }

    /// Permanently removes a trashed subtree, deleting its bytes, version backups and
    /// thumbnails from the back-ends. Back-end delete failures are logged and skipped; the
    /// metadata reference is already gone.
    pub async fn purge(&self, claims: &Claims, path: &str) -> Result<usize> {
        if !self.perms.check(&claims.user_id, path, Level::Owner, claims.is_admin).await? {
            return Err(Error::forbidden(format!("purge of {path} denied")));
        }
        let purged = self.meta.purge(path).await?;
        let count = purged.len();
        self.delete_purged_objects(purged).await;
        Ok(count)
    }

    /// Empties the whole trash. The HTTP layer restricts this to administrators.
    pub async fn purge_all(&self) -> Result<usize> {
        let purged = self.meta.purge_all().await?;
        let count = purged.len();
        self.delete_purged_objects(purged).await;
        Ok(count)
    }

    /// Purges trash entries older than `max_age`.
    pub async fn purge_expired(&self, max_age: chrono::Duration) -> Result<usize> {
        let purged = self.meta.purge_expired(max_age).await?;
        let count = purged.len();
        self.delete_purged_objects(purged).await;
        Ok(count)
    }

    async fn delete_purged_objects(&self, purged: Vec<PurgedObject>) {
        for obj in purged {
            let backend = match self.router.resolve_for_file(obj.location_id.as_deref(), obj.group_id.as_deref()) {
                Ok(b) => b,
                Err(e) => {
                    slog::warn!(self.logger, "purge cannot resolve backend"; "key" => &obj.storage_key, "error" => %e);
                    continue;
                }
            };
            let mut keys = vec![obj.storage_key.clone(), format!("_thumbs/{}", obj.storage_key)];
            keys.extend(obj.version_keys.iter().cloned());
            for key in keys {
                if let Err(e) = backend.delete(&key).await {
                    slog::warn!(self.logger, "purge delete failed"; "key" => &key, "error" => %e);
                }
            }
        }
    }

    /// Rolls the file back to version `v`: snapshots the current state, copies the version's
    /// bytes over the live key and stamps the row with a fresh version number.
    pub async fn rollback(&self, claims: &Claims, path: &str, version: i64) -> Result<Rollback> {
        if !self.perms.check(&claims.user_id, path, Level::Write, claims.is_admin).await? {
            return Err(Error::forbidden(format!("write access to {path} denied")));
        }
        let entry = self
            .meta
            .get_live(path)
            .await?
            .ok_or_else(|| Error::not_found(path.to_string()))?;
        let record = self
            .meta
            .get_version(path, version)
            .await?
            .ok_or_else(|| Error::not_found(format!("version {version} of {path}")))?;
        let backend = self.router.resolve_for_file(entry.location_id.as_deref(), entry.group_id.as_deref())?;

        // Same snapshot policy as a write: row first, bytes best-effort.
        self.meta.save_version(path).await?;
        let current_backup = format!("_versions/{}/{}", entry.storage_key, entry.version);
        if let Err(e) = backend.copy(&entry.storage_key, &current_backup).await {
            slog::warn!(self.logger, "version content backup failed"; "path" => path, "version" => entry.version, "error" => %e);
        }

        backend.copy(&record.backup_key(), &entry.storage_key).await?;
        let new_version = entry.version + 1;
        self.meta.restore_version(path, version, new_version).await?;
        self.events
            .publish(Event::new(EventKind::Version, path, new_version, record.hash.clone(), record.size, &claims.user_id));
        if let Err(e) = self
            .meta
            .record_activity(&claims.user_id, "rollback", path, &format!("to version {version}"))
            .await
        {
            slog::warn!(self.logger, "activity log append failed"; "error" => %e);
        }
        Ok(Rollback {
            restored_version: version,
            new_version,
        })
    }

    /// Moves an entry (and its subtree) to a new path. Content stays under its existing
    /// storage keys; only the namespace changes.
    pub async fn move_entry(&self, claims: &Claims, old: &str, new: &str) -> Result<()> {
        if !self.perms.check(&claims.user_id, old, Level::Write, claims.is_admin).await? {
            return Err(Error::forbidden(format!("write access to {old} denied")));
        }
        if !self.perms.check(&claims.user_id, pathutil::parent_of(new), Level::Write, claims.is_admin).await? {
            return Err(Error::forbidden(format!("write access to {new} denied")));
        }
        self.meta.move_entry(old, new).await?;
        self.events.publish(Event::new(EventKind::Modify, new, 0, "", 0, &claims.user_id));
        Ok(())
    }

    /// Copies a file to a new path: bytes are duplicated under the destination key on the
    /// source's back-end, and the row is cloned at version 1.
    pub async fn copy_entry(&self, claims: &Claims, src: &str, dst: &str) -> Result<FileEntry> {
        if !self.perms.check(&claims.user_id, src, Level::Read, claims.is_admin).await? {
            return Err(Error::forbidden(format!("read access to {src} denied")));
        }
        if !self.perms.check(&claims.user_id, pathutil::parent_of(dst), Level::Write, claims.is_admin).await? {
            return Err(Error::forbidden(format!("write access to {dst} denied")));
        }
        let source = self
            .meta
            .get_live(src)
            .await?
            .ok_or_else(|| Error::not_found(src.to_string()))?;
        if source.is_dir {
            return Err(Error::bad_request("directory copy is not supported"));
        }
        let backend = self.router.resolve_for_file(source.location_id.as_deref(), source.group_id.as_deref())?;
        backend.copy(&source.storage_key, &pathutil::storage_key(dst)).await?;
        let clone = self.meta.copy_entry(src, dst).await?;
        self.events
            .publish(Event::new(EventKind::Create, dst, 1, clone.hash.clone(), clone.size, &claims.user_id));
        Ok(clone)
    }

    /// Changes an entry's visibility (and optionally its group). Owner or admin only.
    pub async fn set_visibility(&self, claims: &Claims, path: &str, visibility: Visibility, group_id: Option<String>) -> Result<()> {
        let entry = self
            .meta
            .get_live(path)
            .await?
            .ok_or_else(|| Error::not_found(path.to_string()))?;
        let allowed = claims.is_admin || entry.owner.as_deref() == Some(claims.user_id.as_str());
        if !allowed {
            return Err(Error::forbidden(format!("visibility of {path} is owner-managed")));
        }
        sqlx::query("UPDATE files SET visibility = ?, group_id = COALESCE(?, group_id), modified = ? WHERE path = ?")
            .bind(visibility)
            .bind(group_id)
            .bind(Utc::now())
            .bind(path)
            .execute(self.meta.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
