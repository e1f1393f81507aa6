//! The authoritative metadata store: directory tree, versions, trash, favorites and search.
//!
//! All writers share one SQLite connection pool. Cross-table invariants (version backup before
//! overwrite, event publish after upsert, back-end delete after purge) are enforced by the
//! write pipeline, not here; the store offers the primitive operations and keeps each one
//! internally consistent (moves and purges run in a single transaction).

mod entry;
mod store;

pub use entry::{FileEntry, PurgedObject, TreeNode, VersionRecord, Visibility};
pub use store::{MetaStore, SearchKind};

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::{str::FromStr, time::Duration};

/// Schema migrations, SQL files applied in lexicographic order on startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Opens the metadata database, applies pending migrations and seeds the root directory row.
///
/// The pool is bounded (25 open, 5 idle, 5 minute connection lifetime) and shared by every
/// writer in the process.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(25)
        .min_connections(5)
        .max_lifetime(Duration::from_secs(300))
        .connect_with(options)
        .await?;
    MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
    store::seed_root(&pool).await?;
    Ok(pool)
}

/// Opens a private in-memory database with the full schema applied. Used by tests and
/// ephemeral deployments.
pub async fn connect_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(sqlx::Error::from)?
        .foreign_keys(true);
    // A single connection: every pooled connection to :memory: would otherwise see its own
    // empty database.
    let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
    MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
    store::seed_root(&pool).await?;
    Ok(pool)
}
