//! SQLite-backed implementation of the metadata operations.

use super::entry::{FileEntry, PurgedObject, TreeNode, VersionRecord};
use crate::error::{Error, Result};
use crate::pathutil;
use chrono::{Duration, Utc};
use slog::o;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;

/// The authoritative store for the namespace. Cheap to clone; all clones share the pool.
#[derive(Clone)]
pub struct MetaStore {
    pool: SqlitePool,
    logger: slog::Logger,
}

/// Entry kinds a search can be narrowed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    /// Files and directories.
    All,
    /// Files only.
    Files,
    /// Directories only.
    Dirs,
    /// Files whose extension is in the image set.
    Images,
}

/// Inserts the root directory row if it is absent.
pub(super) async fn seed_root(pool: &SqlitePool) -> Result<()> {
    let root = FileEntry::directory("/");
    sqlx::query(
        "INSERT INTO files (id, name, path, parent, size, modified, is_dir, version, visibility)
         VALUES (?, '', '/', '/', 0, ?, 1, 0, 'public')
         ON CONFLICT (path) DO NOTHING",
    )
    .bind(&root.id)
    .bind(root.modified)
    .execute(pool)
    .await?;
    Ok(())
}

impl MetaStore {
    /// Creates a store over an already-migrated pool.
    pub fn new(pool: SqlitePool, logger: slog::Logger) -> MetaStore {
        MetaStore {
            pool,
            logger: logger.new(o!("module" => "meta")),
        }
    }

    /// The shared connection pool, for sibling stores that own other tables.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the row at `path`, trashed or not.
    pub async fn get(&self, path: &str) -> Result<Option<FileEntry>> {
        let entry = sqlx::query_as::<_, FileEntry>("SELECT * FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    /// Returns the live row at `path`, if any.
    pub async fn get_live(&self, path: &str) -> Result<Option<FileEntry>> {
        let entry = sqlx::query_as::<_, FileEntry>("SELECT * FROM files WHERE path = ? AND deleted_at IS NULL")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    /// Inserts the entry, or updates size/mtime/hash/storage-key/version of an existing row.
    ///
    /// Ownership is set on first insert and preserved afterwards; visibility is always
    /// preserved on update; group and storage-location are preserved when the incoming values
    /// are null. Writing over a trashed row revives it.
    pub async fn upsert(&self, entry: &FileEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO files (id, name, path, parent, size, modified, is_dir, hash, storage_key, version,
                                owner, visibility, group_id, location_id, deleted_at, deleted_by, original_path)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL)
             ON CONFLICT (path) DO UPDATE SET
                 size = excluded.size,
                 modified = excluded.modified,
                 is_dir = excluded.is_dir,
                 hash = excluded.hash,
                 storage_key = excluded.storage_key,
                 version = excluded.version,
                 owner = COALESCE(files.owner, excluded.owner),
                 group_id = COALESCE(excluded.group_id, files.group_id),
                 location_id = COALESCE(excluded.location_id, files.location_id),
                 deleted_at = NULL,
                 deleted_by = NULL,
                 original_path = NULL",
        )
        .bind(&entry.id)
        .bind(&entry.name)
        .bind(&entry.path)
        .bind(&entry.parent)
        .bind(entry.size)
        .bind(entry.modified)
        .bind(entry.is_dir)
        .bind(&entry.hash)
        .bind(&entry.storage_key)
        .bind(entry.version)
        .bind(&entry.owner)
        .bind(entry.visibility)
        .bind(&entry.group_id)
        .bind(&entry.location_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Live children of `parent`, alphabetical by name.
    pub async fn list(&self, parent: &str) -> Result<Vec<FileEntry>> {
        let rows = sqlx::query_as::<_, FileEntry>(
            "SELECT * FROM files WHERE parent = ? AND path != '/' AND deleted_at IS NULL ORDER BY name",
        )
        .bind(parent)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every live row, ordered by path. The raw material for tree building.
    pub async fn all_live(&self) -> Result<Vec<FileEntry>> {
        let rows = sqlx::query_as::<_, FileEntry>("SELECT * FROM files WHERE deleted_at IS NULL ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Builds a snapshot of the live tree. A virtual root is synthesized if the root row is
    /// somehow absent.
    pub async fn build_tree(&self) -> Result<TreeNode> {
        let rows = self.all_live().await?;
        Ok(assemble_tree(rows))
    }

    /// Inserts directory rows for every missing ancestor of `path`. No back-end interaction.
    pub async fn ensure_ancestors(&self, path: &str) -> Result<()> {
        let mut chain = pathutil::ancestors(path);
        chain.reverse(); // shallowest first so parents land before children
        for dir in chain {
            if dir == pathutil::ROOT {
                continue;
            }
            let row = FileEntry::directory(&dir);
            sqlx::query(
                "INSERT INTO files (id, name, path, parent, size, modified, is_dir, version, visibility)
                 VALUES (?, ?, ?, ?, 0, ?, 1, 0, 'public')
                 ON CONFLICT (path) DO UPDATE SET deleted_at = NULL, deleted_by = NULL, original_path = NULL
                 WHERE files.deleted_at IS NOT NULL",
            )
            .bind(&row.id)
            .bind(&row.name)
            .bind(&row.path)
            .bind(&row.parent)
            .bind(row.modified)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Soft-deletes the entry at `path` and every descendant: sets the deletion timestamp and
    /// deleter and records each row's original path for restore. Returns the number of rows
    /// affected.
    pub async fn soft_delete(&self, path: &str, user: &str) -> Result<u64> {
        let now = Utc::now();
        let res = sqlx::query(
            "UPDATE files SET deleted_at = ?, deleted_by = ?, original_path = path
             WHERE (path = ? OR path LIKE ? || '/%') AND deleted_at IS NULL AND path != '/'",
        )
        .bind(now)
        .bind(user)
        .bind(path)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// Clears deletion marks on every entry whose original path matches `path` or lies below
    /// it. Returns the number of rows restored.
    pub async fn restore(&self, path: &str) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE files SET deleted_at = NULL, deleted_by = NULL, original_path = NULL
             WHERE original_path = ? OR original_path LIKE ? || '/%'",
        )
        .bind(path)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// Every trashed row, ordered by original path.
    pub async fn list_trash(&self) -> Result<Vec<FileEntry>> {
        let rows = sqlx::query_as::<_, FileEntry>("SELECT * FROM files WHERE deleted_at IS NOT NULL ORDER BY original_path")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Hard-deletes the trashed rows under `original_path` and returns what the caller must
    /// also delete from the back-ends, version backups included.
    pub async fn purge(&self, original_path: &str) -> Result<Vec<PurgedObject>> {
        let rows = sqlx::query_as::<_, FileEntry>(
            "SELECT * FROM files WHERE deleted_at IS NOT NULL AND (original_path = ? OR original_path LIKE ? || '/%')",
        )
        .bind(original_path)
        .bind(original_path)
        .fetch_all(&self.pool)
        .await?;
        self.purge_rows(rows).await
    }

    /// Hard-deletes every trashed row.
    pub async fn purge_all(&self) -> Result<Vec<PurgedObject>> {
        let rows = sqlx::query_as::<_, FileEntry>("SELECT * FROM files WHERE deleted_at IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        self.purge_rows(rows).await
    }

    /// Hard-deletes trashed rows older than `max_age`.
    pub async fn purge_expired(&self, max_age: Duration) -> Result<Vec<PurgedObject>> {
        let cutoff = Utc::now() - max_age;
        let rows = sqlx::query_as::<_, FileEntry>("SELECT * FROM files WHERE deleted_at IS NOT NULL AND deleted_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        self.purge_rows(rows).await
    }

    async fn purge_rows(&self, rows: Vec<FileEntry>) -> Result<Vec<PurgedObject>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let mut purged = Vec::new();
        let mut tx = self.pool.begin().await?;
        for row in &rows {
            let versions = sqlx::query_as::<_, VersionRecord>("SELECT * FROM file_versions WHERE path = ?")
                .bind(&row.path)
                .fetch_all(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM file_versions WHERE path = ?")
                .bind(&row.path)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM files WHERE path = ?")
                .bind(&row.path)
                .execute(&mut *tx)
                .await?;
            if !row.is_dir {
                purged.push(PurgedObject {
                    storage_key: row.storage_key.clone(),
                    location_id: row.location_id.clone(),
                    group_id: row.group_id.clone(),
                    version_keys: versions.iter().map(VersionRecord::backup_key).collect(),
                });
            }
        }
        tx.commit().await?;
        slog::debug!(self.logger, "purged {} rows from trash", rows.len());
        Ok(purged)
    }

    /// Snapshots the current row at `path` into the versions table. A no-op when that
    /// `(path, version)` snapshot already exists.
    pub async fn save_version(&self, path: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_versions (id, path, version, size, hash, storage_key, location_id, created_at)
             SELECT id, path, version, size, hash, storage_key, location_id, ?
             FROM files WHERE path = ? AND is_dir = 0
             ON CONFLICT (path, version) DO NOTHING",
        )
        .bind(Utc::now())
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Version records for `path`, newest first, plus the current live version.
    pub async fn list_versions(&self, path: &str) -> Result<(Vec<VersionRecord>, i64)> {
        let records = sqlx::query_as::<_, VersionRecord>("SELECT * FROM file_versions WHERE path = ? ORDER BY version DESC")
            .bind(path)
            .fetch_all(&self.pool)
            .await?;
        let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM files WHERE path = ? AND deleted_at IS NULL")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok((records, current.map(|(v,)| v).unwrap_or(0)))
    }

    /// A single version record.
    pub async fn get_version(&self, path: &str, version: i64) -> Result<Option<VersionRecord>> {
        let record = sqlx::query_as::<_, VersionRecord>("SELECT * FROM file_versions WHERE path = ? AND version = ?")
            .bind(path)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Rewrites the live row at `path` to the size and hash of version `from_version`, stamping
    /// it with `new_version`. The caller has already placed the version's bytes under the live
    /// key.
    pub async fn restore_version(&self, path: &str, from_version: i64, new_version: i64) -> Result<VersionRecord> {
        let record = self
            .get_version(path, from_version)
            .await?
            .ok_or_else(|| Error::not_found(format!("version {from_version} of {path}")))?;
        sqlx::query("UPDATE files SET size = ?, hash = ?, version = ?, modified = ? WHERE path = ?")
            .bind(record.size)
            .bind(&record.hash)
            .bind(new_version)
            .bind(Utc::now())
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(record)
    }

    /// Moves the entry at `old` to `new`, rewriting the paths, parents and ids of every
    /// descendant in one transaction. Version history follows the entry.
    pub async fn move_entry(&self, old: &str, new: &str) -> Result<()> {
        if old == pathutil::ROOT {
            return Err(Error::bad_request("cannot move the root"));
        }
        if pathutil::is_within(old, new) {
            return Err(Error::bad_request(format!("cannot move {old} into itself")));
        }
        let source = self
            .get_live(old)
            .await?
            .ok_or_else(|| Error::not_found(old.to_string()))?;
        if self.get_live(new).await?.is_some() {
            return Err(Error::bad_request(format!("destination {new} already exists")));
        }
        self.ensure_ancestors(new).await?;

        let mut tx = self.pool.begin().await?;
        let affected = sqlx::query_as::<_, FileEntry>("SELECT * FROM files WHERE path = ? OR path LIKE ? || '/%'")
            .bind(old)
            .bind(old)
            .fetch_all(&mut *tx)
            .await?;
        for row in &affected {
            let suffix = &row.path[old.len()..];
            let next_path = format!("{new}{suffix}");
            let next_original = row
                .original_path
                .as_deref()
                .map(|orig| if pathutil::is_within(old, orig) { format!("{new}{}", &orig[old.len()..]) } else { orig.to_string() });
            sqlx::query("UPDATE files SET path = ?, name = ?, parent = ?, id = ?, original_path = ? WHERE path = ?")
                .bind(&next_path)
                .bind(pathutil::name_of(&next_path))
                .bind(pathutil::parent_of(&next_path))
                .bind(pathutil::entry_id(&next_path))
                .bind(&next_original)
                .bind(&row.path)
                .execute(&mut *tx)
                .await?;
            // History follows; the recorded storage keys keep pointing at the existing backups.
            sqlx::query("UPDATE file_versions SET path = ?, id = ? WHERE path = ?")
                .bind(&next_path)
                .bind(pathutil::entry_id(&next_path))
                .bind(&row.path)
                .execute(&mut *tx)
                .await?;
            // Tags and album references have no cascading key, so they move explicitly.
            sqlx::query("UPDATE image_tags SET path = ? WHERE path = ?")
                .bind(&next_path)
                .bind(&row.path)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE album_images SET path = ? WHERE path = ?")
                .bind(&next_path)
                .bind(&row.path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        slog::debug!(self.logger, "moved {} ({} rows)", old, affected.len(); "to" => new, "was_dir" => source.is_dir);
        Ok(())
    }

    /// Clones the row at `src` to `dst` with version 1. The caller is responsible for copying
    /// the bytes to the new storage key first.
    pub async fn copy_entry(&self, src: &str, dst: &str) -> Result<FileEntry> {
        let source = self
            .get_live(src)
            .await?
            .ok_or_else(|| Error::not_found(src.to_string()))?;
        if self.get_live(dst).await?.is_some() {
            return Err(Error::bad_request(format!("destination {dst} already exists")));
        }
        self.ensure_ancestors(dst).await?;
        let mut clone = source.clone();
        clone.id = pathutil::entry_id(dst);
        clone.path = dst.to_string();
        clone.name = pathutil::name_of(dst).to_string();
        clone.parent = pathutil::parent_of(dst).to_string();
        clone.storage_key = pathutil::storage_key(dst);
        clone.version = if source.is_dir { 0 } else { 1 };
        clone.modified = Utc::now();
        self.upsert(&clone).await?;
        Ok(clone)
    }

    /// Live entries whose name contains `query`, optionally narrowed by kind.
    pub async fn search(&self, query: &str, kind: SearchKind) -> Result<Vec<FileEntry>> {
        let mut rows = sqlx::query_as::<_, FileEntry>(
            "SELECT * FROM files WHERE deleted_at IS NULL AND path != '/' AND name LIKE '%' || ? || '%' ORDER BY path",
        )
        .bind(query)
        .fetch_all(&self.pool)
        .await?;
        rows.retain(|e| match kind {
            SearchKind::All => true,
            SearchKind::Files => !e.is_dir,
            SearchKind::Dirs => e.is_dir,
            SearchKind::Images => !e.is_dir && crate::media::is_image_path(&e.path),
        });
        Ok(rows)
    }

    /// Marks `path` as a favorite of `user`.
    pub async fn favorite_add(&self, user: &str, path: &str) -> Result<()> {
        sqlx::query("INSERT INTO user_favorites (user_id, path) VALUES (?, ?) ON CONFLICT DO NOTHING")
            .bind(user)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes a favorite.
    pub async fn favorite_remove(&self, user: &str, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_favorites WHERE user_id = ? AND path = ?")
            .bind(user)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The user's favorites that still resolve to live entries.
    pub async fn favorites(&self, user: &str) -> Result<Vec<FileEntry>> {
        let rows = sqlx::query_as::<_, FileEntry>(
            "SELECT f.* FROM files f
             JOIN user_favorites uf ON uf.path = f.path
             WHERE uf.user_id = ? AND f.deleted_at IS NULL
             ORDER BY f.path",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Total live bytes owned by `user`.
    pub async fn storage_used(&self, user: &str) -> Result<i64> {
        let (used,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(size), 0) FROM files WHERE owner = ? AND is_dir = 0 AND deleted_at IS NULL",
        )
        .bind(user)
        .fetch_one(&self.pool)
        .await?;
        Ok(used)
    }

    /// Appends an activity row. Callers treat failures as best-effort.
    pub async fn record_activity(&self, user: &str, action: &str, path: &str, detail: &str) -> Result<()> {
        sqlx::query("INSERT INTO activity_log (user_id, action, path, detail, at) VALUES (?, ?, ?, ?, ?)")
            .bind(user)
            .bind(action)
            .bind(path)
            .bind(detail)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Links a flat row list into a tree by parent path. Rows arrive ordered by path, so a parent
/// always precedes its children.
fn assemble_tree(rows: Vec<FileEntry>) -> TreeNode {
    let mut root: Option<FileEntry> = None;
    let mut children_of: HashMap<String, Vec<FileEntry>> = HashMap::new();
    for row in rows {
        if row.path == pathutil::ROOT {
            root = Some(row);
        } else {
            children_of.entry(row.parent.clone()).or_default().push(row);
        }
    }
    let root = root.unwrap_or_else(|| FileEntry::directory(pathutil::ROOT));
    attach(root, &mut children_of)
}

fn attach(entry: FileEntry, children_of: &mut HashMap<String, Vec<FileEntry>>) -> TreeNode {
    let mut node = TreeNode::leaf(entry);
    if let Some(mut kids) = children_of.remove(&node.entry.path) {
        kids.sort_by(|a, b| a.name.cmp(&b.name));
        node.children = kids.into_iter().map(|k| attach(k, children_of)).collect();
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::connect_memory;
    use pretty_assertions::assert_eq;

    async fn store() -> MetaStore {
        let pool = connect_memory().await.unwrap();
        MetaStore::new(pool, slog::Logger::root(slog::Discard, o!()))
    }

    fn file(path: &str, size: i64, hash: &str) -> FileEntry {
        FileEntry::file(path, size, hash.to_string(), Some("u1".to_string()), None)
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_preserves_owner() {
        let s = store().await;
        s.ensure_ancestors("/docs/a.txt").await.unwrap();
        s.upsert(&file("/docs/a.txt", 2, "h1")).await.unwrap();
        s.upsert(&file("/docs/a.txt", 2, "h1")).await.unwrap();

        let got = s.get_live("/docs/a.txt").await.unwrap().unwrap();
        assert_eq!(got.size, 2);
        assert_eq!(got.owner.as_deref(), Some("u1"));

        // A later writer does not steal ownership.
        let mut second = file("/docs/a.txt", 4, "h2");
        second.owner = Some("u2".to_string());
        second.version = 2;
        s.upsert(&second).await.unwrap();
        let got = s.get_live("/docs/a.txt").await.unwrap().unwrap();
        assert_eq!(got.owner.as_deref(), Some("u1"));
        assert_eq!(got.version, 2);
        assert_eq!(got.hash, "h2");
    }

    #[tokio::test]
    async fn list_is_alphabetical_and_skips_trash() {
        let s = store().await;
        s.ensure_ancestors("/d/x").await.unwrap();
        s.upsert(&file("/d/beta", 1, "b")).await.unwrap();
        s.upsert(&file("/d/alpha", 1, "a")).await.unwrap();
        s.upsert(&file("/d/gamma", 1, "g")).await.unwrap();
        s.soft_delete("/d/beta", "u1").await.unwrap();

        let names: Vec<String> = s.list("/d").await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "gamma".to_string()]);
    }

    #[tokio::test]
    async fn soft_delete_restore_roundtrip_preserves_rows() {
        let s = store().await;
        s.ensure_ancestors("/x/a").await.unwrap();
        s.upsert(&file("/x/a", 1, "ha")).await.unwrap();
        s.upsert(&file("/x/b", 1, "hb")).await.unwrap();
        let before = s.get("/x/a").await.unwrap().unwrap();

        let n = s.soft_delete("/x", "u1").await.unwrap();
        assert_eq!(n, 3); // /x, /x/a, /x/b
        assert!(s.get_live("/x/a").await.unwrap().is_none());
        assert_eq!(s.list("/").await.unwrap().len(), 0);
        let trash = s.list_trash().await.unwrap();
        assert_eq!(trash.len(), 3);
        assert_eq!(trash[1].original_path.as_deref(), Some("/x/a"));

        let n = s.restore("/x").await.unwrap();
        assert_eq!(n, 3);
        let after = s.get_live("/x/a").await.unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.hash, before.hash);
        assert!(s.list_trash().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_returns_backend_work() {
        let s = store().await;
        s.ensure_ancestors("/p/f.bin").await.unwrap();
        s.upsert(&file("/p/f.bin", 9, "h1")).await.unwrap();
        s.save_version("/p/f.bin").await.unwrap();
        s.soft_delete("/p", "u1").await.unwrap();

        let purged = s.purge("/p").await.unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].storage_key, "p/f.bin");
        assert_eq!(purged[0].version_keys, vec!["_versions/p/f.bin/1".to_string()]);
        assert!(s.get("/p/f.bin").await.unwrap().is_none());
        assert!(s.get("/p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn version_snapshots_conflict_quietly() {
        let s = store().await;
        s.upsert(&file("/v.txt", 1, "h1")).await.unwrap();
        s.save_version("/v.txt").await.unwrap();
        s.save_version("/v.txt").await.unwrap(); // same (path, version): no-op

        let (versions, current) = s.list_versions("/v.txt").await.unwrap();
        assert_eq!(current, 1);
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].hash, "h1");
    }

    #[tokio::test]
    async fn move_rewrites_descendants_and_history() {
        let s = store().await;
        s.ensure_ancestors("/old/sub/f.txt").await.unwrap();
        s.upsert(&file("/old/sub/f.txt", 1, "h")).await.unwrap();
        s.save_version("/old/sub/f.txt").await.unwrap();

        s.move_entry("/old", "/new").await.unwrap();

        assert!(s.get_live("/old/sub/f.txt").await.unwrap().is_none());
        let moved = s.get_live("/new/sub/f.txt").await.unwrap().unwrap();
        assert_eq!(moved.id, pathutil::entry_id("/new/sub/f.txt"));
        assert_eq!(moved.parent, "/new/sub");
        let (versions, _) = s.list_versions("/new/sub/f.txt").await.unwrap();
        assert_eq!(versions.len(), 1);
        // The backup key still points at the bytes written before the move.
        assert_eq!(versions[0].backup_key(), "_versions/old/sub/f.txt/1");
    }

    #[tokio::test]
    async fn move_into_own_subtree_is_rejected() {
        let s = store().await;
        s.ensure_ancestors("/a/b/c").await.unwrap();
        let err = s.move_entry("/a", "/a/b/d").await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn tree_snapshot_nests_children() {
        let s = store().await;
        s.ensure_ancestors("/top/mid/leaf.txt").await.unwrap();
        s.upsert(&file("/top/mid/leaf.txt", 1, "h")).await.unwrap();

        let tree = s.build_tree().await.unwrap();
        assert_eq!(tree.entry.path, "/");
        let leaf = tree.find("/top/mid/leaf.txt").unwrap();
        assert!(!leaf.entry.is_dir);
        assert_eq!(tree.find("/top/mid").unwrap().children.len(), 1);
    }

    #[tokio::test]
    async fn favorites_follow_liveness() {
        let s = store().await;
        s.upsert(&file("/fav.txt", 1, "h")).await.unwrap();
        s.favorite_add("u1", "/fav.txt").await.unwrap();
        assert_eq!(s.favorites("u1").await.unwrap().len(), 1);

        s.soft_delete("/fav.txt", "u1").await.unwrap();
        assert!(s.favorites("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_filters_by_kind() {
        let s = store().await;
        s.ensure_ancestors("/pics/cat.jpg").await.unwrap();
        s.upsert(&file("/pics/cat.jpg", 1, "h")).await.unwrap();
        s.upsert(&file("/pics/cat.txt", 1, "h")).await.unwrap();

        let hits = s.search("cat", SearchKind::Images).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/pics/cat.jpg");
        let hits = s.search("pics", SearchKind::Dirs).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_dir);
    }
}
