//! Permission resolution: owner / visibility / ACL / group-role with path inheritance.
//!
//! A grant on a directory applies to every descendant; a grant on a file applies only to that
//! file. Levels are totally ordered: read < write < owner. A group role maps onto a level
//! (viewer→read, editor→write, admin→write).
//!
//! Tree filtering is the hot path: it pre-loads the caller's ACLs and group roles once per
//! request into an [`AccessMaps`] and evaluates in memory.

use crate::error::Result;
use crate::meta::{FileEntry, Visibility};
use crate::pathutil;
use serde::{Deserialize, Serialize};
use slog::o;
use sqlx::sqlite::SqlitePool;
use std::collections::{HashMap, HashSet};

/// Access levels, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Level {
    /// May read content and see the entry in trees.
    Read,
    /// May write, move and soft-delete.
    Write,
    /// Full control, including delete and permission management.
    Owner,
}

/// Roles a user can hold in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum GroupRole {
    /// Read-only member.
    Viewer,
    /// Read/write member.
    Editor,
    /// Group administrator; write access to group content.
    Admin,
}

impl GroupRole {
    /// The permission level this role grants on group content.
    pub fn level(self) -> Level {
        match self {
            GroupRole::Viewer => Level::Read,
            GroupRole::Editor | GroupRole::Admin => Level::Write,
        }
    }
}

/// A user's explicit grant on a path.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permission {
    /// Grantee.
    pub user_id: String,
    /// Path the grant is attached to.
    pub path: String,
    /// Granted level.
    pub level: Level,
}

/// Pre-loaded per-caller access state for in-memory evaluation.
#[derive(Debug, Clone, Default)]
pub struct AccessMaps {
    /// path → level granted directly to the user.
    pub acls: HashMap<String, Level>,
    /// group id → the user's role in it.
    pub roles: HashMap<String, GroupRole>,
    /// path → strongest level granted to any of the user's groups.
    pub group_acls: HashMap<String, Level>,
}

impl AccessMaps {
    /// The group ids the user belongs to.
    pub fn group_set(&self) -> HashSet<String> {
        self.roles.keys().cloned().collect()
    }

    /// In-memory mirror of [`Evaluator::check`] against a loaded entry.
    pub fn allows(&self, user: &str, entry: &FileEntry, required: Level, is_admin: bool) -> bool {
        if is_admin {
            return true;
        }
        if entry.owner.as_deref() == Some(user) {
            return true;
        }
        for p in prefixes(&entry.path) {
            if self.acls.get(&p).is_some_and(|l| *l >= required) {
                return true;
            }
        }
        if let Some(group) = &entry.group_id
            && self.roles.get(group).is_some_and(|r| r.level() >= required)
        {
            return true;
        }
        for p in prefixes(&entry.path) {
            if self.group_acls.get(&p).is_some_and(|l| *l >= required) {
                return true;
            }
        }
        false
    }

    /// Mirror of [`Evaluator::check_visibility`] using the pre-loaded group set.
    pub fn sees(&self, user: &str, entry: &FileEntry, is_admin: bool) -> bool {
        visibility_allows(entry, user, is_admin, |g| self.roles.contains_key(g))
    }
}

fn prefixes(path: &str) -> Vec<String> {
    let mut out = vec![path.to_string()];
    out.extend(pathutil::ancestors(path));
    out
}

fn visibility_allows(entry: &FileEntry, user: &str, is_admin: bool, is_member: impl Fn(&str) -> bool) -> bool {
    if is_admin {
        return true;
    }
    match entry.visibility {
        Visibility::Public => true,
        Visibility::Private => entry.owner.as_deref() == Some(user),
        // No group recorded: fall back to visible rather than locking everyone out.
        Visibility::Group => entry.group_id.as_deref().map(&is_member).unwrap_or(true),
    }
}

/// Resolves permissions against the grants tables.
#[derive(Clone)]
pub struct Evaluator {
    pool: SqlitePool,
    #[allow(dead_code)]
    logger: slog::Logger,
}

impl Evaluator {
    /// Creates an evaluator over the shared pool.
    pub fn new(pool: SqlitePool, logger: slog::Logger) -> Evaluator {
        Evaluator {
            pool,
            logger: logger.new(o!("module" => "perm")),
        }
    }

    /// Whether `user` holds `required` on `path`. Resolution order: admin, entry owner, user
    /// ACLs on the path and its ancestors, the entry's group role, group grants on the path
    /// and its ancestors; otherwise deny.
    pub async fn check(&self, user: &str, path: &str, required: Level, is_admin: bool) -> Result<bool> {
        if is_admin {
            return Ok(true);
        }
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT owner, group_id FROM files WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        let (owner, group_id) = row.unwrap_or((None, None));
        if owner.as_deref() == Some(user) {
            return Ok(true);
        }
        let maps = self.load_access_maps(user).await?;
        for p in prefixes(path) {
            if maps.acls.get(&p).is_some_and(|l| *l >= required) {
                return Ok(true);
            }
        }
        if let Some(group) = &group_id
            && maps.roles.get(group).is_some_and(|r| r.level() >= required)
        {
            return Ok(true);
        }
        for p in prefixes(path) {
            if maps.group_acls.get(&p).is_some_and(|l| *l >= required) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether `user` may see `entry` at all, per its visibility gate.
    pub async fn check_visibility(&self, entry: &FileEntry, user: &str, is_admin: bool) -> Result<bool> {
        if is_admin || entry.visibility != Visibility::Group {
            return Ok(visibility_allows(entry, user, is_admin, |_| false));
        }
        let Some(group) = entry.group_id.as_deref() else {
            return Ok(true);
        };
        let member: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group)
            .bind(user)
            .fetch_optional(&self.pool)
            .await?;
        Ok(member.is_some())
    }

    /// Loads the caller's ACLs, group roles and group grants in one pass, for in-memory tree
    /// filtering.
    pub async fn load_access_maps(&self, user: &str) -> Result<AccessMaps> {
        let acls: Vec<(String, Level)> = sqlx::query_as("SELECT path, level FROM file_permissions WHERE user_id = ?")
            .bind(user)
            .fetch_all(&self.pool)
            .await?;
        let roles: Vec<(String, GroupRole)> = sqlx::query_as("SELECT group_id, role FROM group_members WHERE user_id = ?")
            .bind(user)
            .fetch_all(&self.pool)
            .await?;
        let group_acls: Vec<(String, Level)> = sqlx::query_as(
            "SELECT gp.path, gp.level FROM group_permissions gp
             JOIN group_members gm ON gm.group_id = gp.group_id
             WHERE gm.user_id = ?",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        let mut maps = AccessMaps {
            acls: acls.into_iter().collect(),
            roles: roles.into_iter().collect(),
            group_acls: HashMap::new(),
        };
        // Keep the strongest grant per path when several of the user's groups overlap.
        for (path, level) in group_acls {
            maps.group_acls
                .entry(path)
                .and_modify(|cur| {
                    if level > *cur {
                        *cur = level;
                    }
                })
                .or_insert(level);
        }
        Ok(maps)
    }

    /// Grants `level` on `path` to `user`, replacing any previous grant.
    pub async fn set_permission(&self, user: &str, path: &str, level: Level) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_permissions (user_id, path, level) VALUES (?, ?, ?)
             ON CONFLICT (user_id, path) DO UPDATE SET level = excluded.level",
        )
        .bind(user)
        .bind(path)
        .bind(level)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Revokes the user's grant on `path`.
    pub async fn remove_permission(&self, user: &str, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM file_permissions WHERE user_id = ? AND path = ?")
            .bind(user)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All grants attached to `path`.
    pub async fn list_permissions(&self, path: &str) -> Result<Vec<Permission>> {
        let rows = sqlx::query_as::<_, Permission>("SELECT user_id, path, level FROM file_permissions WHERE path = ? ORDER BY user_id")
            .bind(path)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Adds or updates a group membership.
    pub async fn set_group_member(&self, group: &str, user: &str, role: GroupRole) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id, role) VALUES (?, ?, ?)
             ON CONFLICT (group_id, user_id) DO UPDATE SET role = excluded.role",
        )
        .bind(group)
        .bind(user)
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Grants `level` on `path` to every member of `group`.
    pub async fn set_group_permission(&self, group: &str, path: &str, level: Level) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_permissions (group_id, path, level) VALUES (?, ?, ?)
             ON CONFLICT (group_id, path) DO UPDATE SET level = excluded.level",
        )
        .bind(group)
        .bind(path)
        .bind(level)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
