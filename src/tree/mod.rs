//! The in-memory filtered tree: a wholesale snapshot of the live namespace, rebuilt on
//! mutation and filtered per caller with pre-loaded access maps.
//!
//! Readers always see either the old snapshot or the new one, never a partially mutated
//! tree: the snapshot is an `Arc` swapped under a short exclusive lock.

use crate::auth::Claims;
use crate::error::Result;
use crate::meta::{MetaStore, TreeNode};
use crate::perm::{AccessMaps, Evaluator, Level};
use crate::pathutil;
use slog::o;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Caches the full live tree and serves filtered per-user views of it.
pub struct TreeCache {
    meta: MetaStore,
    perms: Evaluator,
    snapshot: RwLock<Arc<TreeNode>>,
    logger: slog::Logger,
}

impl TreeCache {
    /// Creates an empty cache; call [`TreeCache::refresh`] before serving from it.
    pub fn new(meta: MetaStore, perms: Evaluator, logger: slog::Logger) -> TreeCache {
        use crate::meta::FileEntry;
        TreeCache {
            meta,
            perms,
            snapshot: RwLock::new(Arc::new(TreeNode::leaf(FileEntry::directory(pathutil::ROOT)))),
            logger: logger.new(o!("module" => "tree")),
        }
    }

    /// Rebuilds the snapshot from the metadata store and swaps it in.
    pub async fn refresh(&self) -> Result<()> {
        let fresh = Arc::new(self.meta.build_tree().await?);
        *self.snapshot.write().await = fresh;
        slog::debug!(self.logger, "tree snapshot refreshed");
        Ok(())
    }

    /// The current unfiltered snapshot.
    pub async fn snapshot(&self) -> Arc<TreeNode> {
        self.snapshot.read().await.clone()
    }

    /// The tree as `claims` may see it. Visibility and read-permission rules are evaluated in
    /// memory against maps loaded once per call; unreadable subtrees are pruned.
    pub async fn filtered(&self, claims: &Claims) -> Result<TreeNode> {
        let maps = self.perms.load_access_maps(&claims.user_id).await?;
        let snapshot = self.snapshot().await;
        Ok(filter_node(&snapshot, claims, &maps).unwrap_or_else(|| TreeNode::leaf(snapshot.entry.clone())))
    }

    /// A filtered subtree rooted at `path`, if the caller may see it.
    pub async fn filtered_at(&self, claims: &Claims, path: &str) -> Result<Option<TreeNode>> {
        let full = self.filtered(claims).await?;
        Ok(full.find(path).cloned())
    }
}

// Files appear when the caller passes both the visibility gate and the read check.
// Directories carry the structure: they stay when visible and either readable themselves or
// holding something the caller may see below.
fn filter_node(node: &TreeNode, claims: &Claims, maps: &AccessMaps) -> Option<TreeNode> {
    if !maps.sees(&claims.user_id, &node.entry, claims.is_admin) {
        return None;
    }
    let readable = maps.allows(&claims.user_id, &node.entry, Level::Read, claims.is_admin);
    if !node.entry.is_dir {
        return readable.then(|| TreeNode::leaf(node.entry.clone()));
    }
    let children: Vec<TreeNode> = node.children.iter().filter_map(|c| filter_node(c, claims, maps)).collect();
    if readable || !children.is_empty() || node.entry.path == pathutil::ROOT {
        Some(TreeNode {
            entry: node.entry.clone(),
            children,
        })
    } else {
        None
    }
}
