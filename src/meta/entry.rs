//! Row types of the namespace tables.

use crate::pathutil;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who may see an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to every authenticated user.
    Public,
    /// Visible to members of the entry's group.
    Group,
    /// Visible to the owner only.
    Private,
}

/// A node in the path-addressed namespace: a file or a directory.
///
/// `path` uniquely identifies the row; a soft-deleted row (non-null `deleted_at`) still
/// occupies its path until purged but is invisible to tree and list operations.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileEntry {
    /// Stable opaque id, derived deterministically from the path.
    pub id: String,
    /// Display name, the final path component.
    pub name: String,
    /// Absolute POSIX-style path with a leading `/`.
    pub path: String,
    /// Path of the containing directory.
    pub parent: String,
    /// Size in bytes; `0` for directories.
    pub size: i64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Whether this entry is a directory.
    pub is_dir: bool,
    /// SHA-256 hex of the content; empty for directories.
    pub hash: String,
    /// Key under which the content lives on its back-end.
    pub storage_key: String,
    /// Monotonic version, `>= 1` for files, `0` for directories.
    pub version: i64,
    /// Owning user; set on first upload, preserved thereafter.
    pub owner: Option<String>,
    /// Visibility gate applied by tree filtering.
    pub visibility: Visibility,
    /// Group this entry belongs to, if any.
    pub group_id: Option<String>,
    /// Storage location the content was written to; `None` means the default.
    pub location_id: Option<String>,
    /// Soft-deletion timestamp; `None` means alive.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Who soft-deleted the entry.
    pub deleted_by: Option<String>,
    /// Where the entry lived when it was soft-deleted, for restore.
    pub original_path: Option<String>,
}

impl FileEntry {
    /// Builds a directory entry for `path` with the current time.
    pub fn directory(path: &str) -> FileEntry {
        FileEntry {
            id: pathutil::entry_id(path),
            name: pathutil::name_of(path).to_string(),
            path: path.to_string(),
            parent: pathutil::parent_of(path).to_string(),
            size: 0,
            modified: Utc::now(),
            is_dir: true,
            hash: String::new(),
            storage_key: String::new(),
            version: 0,
            owner: None,
            visibility: Visibility::Public,
            group_id: None,
            location_id: None,
            deleted_at: None,
            deleted_by: None,
            original_path: None,
        }
    }

    /// Builds a file entry at version 1; the pipeline bumps the version for overwrites.
    #[allow(clippy::too_many_arguments)]
    pub fn file(path: &str, size: i64, hash: String, owner: Option<String>, location_id: Option<String>) -> FileEntry {
        FileEntry {
            id: pathutil::entry_id(path),
            name: pathutil::name_of(path).to_string(),
            path: path.to_string(),
            parent: pathutil::parent_of(path).to_string(),
            size,
            modified: Utc::now(),
            is_dir: false,
            hash,
            storage_key: pathutil::storage_key(path),
            version: 1,
            owner,
            visibility: Visibility::Public,
            group_id: None,
            location_id,
            deleted_at: None,
            deleted_by: None,
            original_path: None,
        }
    }

    /// Whether the entry is alive (not in the trash).
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// A frozen snapshot of a file row, preserving the bytes' identity at that version.
///
/// The record asserts that the bytes at `_versions/<storage_key>/<version>` on the referenced
/// back-end are those bytes; the back-end copy happens before the record's consumers rely on it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VersionRecord {
    /// Id of the file at snapshot time.
    pub id: String,
    /// Path of the file at snapshot time.
    pub path: String,
    /// Version number this record freezes.
    pub version: i64,
    /// Size in bytes at this version.
    pub size: i64,
    /// SHA-256 hex at this version.
    pub hash: String,
    /// Live storage key at snapshot time.
    pub storage_key: String,
    /// Storage location the bytes live on.
    pub location_id: Option<String>,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

impl VersionRecord {
    /// The back-end key holding this version's bytes.
    pub fn backup_key(&self) -> String {
        format!("_versions/{}/{}", self.storage_key, self.version)
    }
}

/// An entry with its live children recursively attached; the shape of tree responses.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    /// The entry at this node.
    #[serde(flatten)]
    pub entry: FileEntry,
    /// Live children, alphabetical by name.
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Wraps an entry with no children attached yet.
    pub fn leaf(entry: FileEntry) -> TreeNode {
        TreeNode { entry, children: Vec::new() }
    }

    /// Depth-first search for the node at `path`.
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        if self.entry.path == path {
            return Some(self);
        }
        if !pathutil::is_within(&self.entry.path, path) {
            return None;
        }
        self.children.iter().find_map(|c| c.find(path))
    }
}

/// What a purge removed, so the caller can also delete the bytes from the back-ends.
#[derive(Debug, Clone)]
pub struct PurgedObject {
    /// Live storage key of the purged row.
    pub storage_key: String,
    /// Location the content lives on; `None` means the default.
    pub location_id: Option<String>,
    /// Group of the purged row, for group-routed locations.
    pub group_id: Option<String>,
    /// Version backup keys that existed for the row.
    pub version_keys: Vec<String>,
}
