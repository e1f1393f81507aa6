//! Resumable chunked uploads.
//!
//! A session pre-allocates a sparse temp file of exactly the declared size, so chunks can be
//! written at deterministic offsets in any order, concurrently and idempotently. `complete`
//! verifies that every chunk arrived, hashes the assembled file and hands it to the write
//! pipeline. A crash between steps leaves the session active and resumable: the temp file
//! keeps whatever was written and `status` tells the client which chunks are missing.

use crate::auth::Claims;
use crate::error::{Error, Result};
use crate::pipeline::{WriteOutcome, WritePipeline};
use crate::perm::Level;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use slog::o;
use sqlx::sqlite::SqlitePool;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Default size of a chunk.
pub const DEFAULT_CHUNK_SIZE: i64 = 5 * 1024 * 1024;
/// Sessions expire this long after init.
pub const SESSION_TTL_HOURS: i64 = 24;

const STATUS_ACTIVE: &str = "active";
const STATUS_COMPLETED: &str = "completed";

/// A server-side upload session row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UploadSession {
    /// Opaque session id (128-bit random, hex).
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Target namespace path.
    pub path: String,
    /// Client-supplied file name.
    pub file_name: String,
    /// Declared total size in bytes.
    pub total_size: i64,
    /// Fixed chunk size for this session.
    pub chunk_size: i64,
    /// Number of chunks the client must deliver.
    pub total_chunks: i64,
    /// `active` or `completed`.
    pub status: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the janitor may collect the session.
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// Manages upload sessions, their chunk bookkeeping and their temp files.
#[derive(Clone)]
pub struct ChunkedUploads {
    pool: SqlitePool,
    pipeline: WritePipeline,
    temp_dir: PathBuf,
    chunk_size: i64,
    logger: slog::Logger,
}

impl ChunkedUploads {
    /// Creates a manager writing temp files into `temp_dir`.
    pub fn new(pool: SqlitePool, pipeline: WritePipeline, temp_dir: impl Into<PathBuf>, chunk_size: i64, logger: slog::Logger) -> ChunkedUploads {
        ChunkedUploads {
            pool,
            pipeline,
            temp_dir: temp_dir.into(),
            chunk_size,
            logger: logger.new(o!("module" => "upload")),
        }
    }

    fn temp_path(&self, id: &str) -> PathBuf {
        self.temp_dir.join(format!("{id}.part"))
    }

    /// Opens a new session: permission and quota pre-checks, session row, pre-allocated temp
    /// file. Returns the session for the init response.
    pub async fn init(&self, claims: &Claims, path: &str, file_name: &str, size: i64) -> Result<UploadSession> {
        if size <= 0 {
            return Err(Error::bad_request("fileSize must be positive"));
        }
        if !self.pipeline.perms().check(&claims.user_id, path, Level::Write, claims.is_admin).await? {
            return Err(Error::forbidden(format!("write access to {path} denied")));
        }
        let limit = self.pipeline.gate().upload_size_limit(&claims.user_id).await?;
        if size > limit {
            return Err(Error::PayloadTooLarge(format!("upload of {size} bytes exceeds limit {limit}")));
        }
        self.pipeline.gate().check_storage_quota(&claims.user_id, size).await?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let total_chunks = (size + self.chunk_size - 1) / self.chunk_size;
        let now = Utc::now();
        let session = UploadSession {
            id: id.clone(),
            user_id: claims.user_id.clone(),
            path: path.to_string(),
            file_name: file_name.to_string(),
            total_size: size,
            chunk_size: self.chunk_size,
            total_chunks,
            status: STATUS_ACTIVE.to_string(),
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        };
        sqlx::query(
            "INSERT INTO chunked_uploads (id, user_id, path, file_name, total_size, chunk_size, total_chunks, status, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.path)
        .bind(&session.file_name)
        .bind(session.total_size)
        .bind(session.chunk_size)
        .bind(session.total_chunks)
        .bind(&session.status)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        tokio::fs::create_dir_all(&self.temp_dir).await.map_err(|e| Error::Internal(format!("temp dir: {e}")))?;
        let file = tokio::fs::File::create(self.temp_path(&id))
            .await
            .map_err(|e| Error::Internal(format!("temp file: {e}")))?;
        // Sparse pre-allocation to the full declared size fixes every chunk's offset.
        file.set_len(size as u64).await.map_err(|e| Error::Internal(format!("temp file: {e}")))?;

        slog::info!(self.logger, "upload session opened"; "id" => &session.id, "path" => path, "chunks" => total_chunks);
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<UploadSession> {
        sqlx::query_as::<_, UploadSession>("SELECT * FROM chunked_uploads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(format!("upload session {id}")))
    }

    fn authorize<'a>(&self, claims: &Claims, session: &'a UploadSession) -> Result<&'a UploadSession> {
        if session.user_id != claims.user_id && !claims.is_admin {
            return Err(Error::forbidden(format!("upload session {} belongs to another user", session.id)));
        }
        Ok(session)
    }

    /// Writes one chunk at its deterministic offset. Idempotent per `(session, index)`: a
    /// double PUT overwrites the same bytes at the same offset.
    pub async fn chunk(&self, claims: &Claims, id: &str, index: i64, body: Bytes) -> Result<()> {
        let session = self.get_session(id).await?;
        self.authorize(claims, &session)?;
        if !session.is_active() {
            return Err(Error::bad_request(format!("upload session {id} is not active")));
        }
        if index < 0 || index >= session.total_chunks {
            return Err(Error::bad_request(format!(
                "chunk index {index} out of range 0..{}",
                session.total_chunks
            )));
        }
        let offset = index * session.chunk_size;
        let expected = if index == session.total_chunks - 1 {
            session.total_size - offset
        } else {
            session.chunk_size
        };
        if body.len() as i64 > expected {
            return Err(Error::bad_request(format!(
                "chunk {index} carries {} bytes, at most {expected} expected",
                body.len()
            )));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(self.temp_path(id))
            .await
            .map_err(|e| Error::Internal(format!("temp file: {e}")))?;
        file.seek(std::io::SeekFrom::Start(offset as u64))
            .await
            .map_err(|e| Error::Internal(format!("temp file seek: {e}")))?;
        file.write_all(&body).await.map_err(|e| Error::Internal(format!("chunk write: {e}")))?;
        // Success must mean the bytes are durably placed.
        file.sync_data().await.map_err(|e| Error::Internal(format!("chunk sync: {e}")))?;

        sqlx::query(
            "INSERT INTO upload_chunks (upload_id, chunk_index, size, received_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (upload_id, chunk_index) DO UPDATE SET size = excluded.size, received_at = excluded.received_at",
        )
        .bind(id)
        .bind(index)
        .bind(body.len() as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The ordered received chunk indices and the session status.
    pub async fn status(&self, claims: &Claims, id: &str) -> Result<(UploadSession, Vec<i64>)> {
        let session = self.get_session(id).await?;
        self.authorize(claims, &session)?;
        let received: Vec<(i64,)> = sqlx::query_as("SELECT chunk_index FROM upload_chunks WHERE upload_id = ? ORDER BY chunk_index")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok((session, received.into_iter().map(|(i,)| i).collect()))
    }

    /// Verifies every chunk arrived, hashes the assembled temp file and runs the write
    /// pipeline with it as the body stream. On success the session is completed, the chunk
    /// rows are deleted and the temp file is removed.
    pub async fn complete(&self, claims: &Claims, id: &str) -> Result<WriteOutcome> {
        let session = self.get_session(id).await?;
        self.authorize(claims, &session)?;
        if !session.is_active() {
            return Err(Error::bad_request(format!("upload session {id} is not active")));
        }
        let (received,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM upload_chunks WHERE upload_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if received != session.total_chunks {
            return Err(Error::bad_request(format!("received {received}/{} chunks", session.total_chunks)));
        }

        let temp = self.temp_path(id);
        let hash = hash_file(&temp).await.map_err(|e| Error::Internal(format!("hashing assembled file: {e}")))?;
        let file = tokio::fs::File::open(&temp).await.map_err(|e| Error::Internal(format!("temp file: {e}")))?;
        let reader = Box::new(tokio::io::BufReader::with_capacity(64 * 1024, file));
        let outcome = self
            .pipeline
            .commit(claims, &session.path, session.total_size, hash, reader, None, None)
            .await?;

        sqlx::query("UPDATE chunked_uploads SET status = ? WHERE id = ?")
            .bind(STATUS_COMPLETED)
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM upload_chunks WHERE upload_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            slog::warn!(self.logger, "temp file removal failed"; "id" => id, "error" => %e);
        }
        slog::info!(self.logger, "upload session completed"; "id" => id, "path" => &session.path, "version" => outcome.entry.version);
        Ok(outcome)
    }

    /// Drops the session, its chunk rows and its temp file.
    pub async fn abort(&self, claims: &Claims, id: &str) -> Result<()> {
        let session = self.get_session(id).await?;
        self.authorize(claims, &session)?;
        self.remove_session(id).await
    }

    async fn remove_session(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM upload_chunks WHERE upload_id = ?").bind(id).execute(&self.pool).await?;
        sqlx::query("DELETE FROM chunked_uploads WHERE id = ?").bind(id).execute(&self.pool).await?;
        if let Err(e) = tokio::fs::remove_file(self.temp_path(id)).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            slog::warn!(self.logger, "temp file removal failed"; "id" => id, "error" => %e);
        }
        Ok(())
    }

    /// Garbage-collects sessions whose expiry has passed. Returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let expired: Vec<(String,)> = sqlx::query_as("SELECT id FROM chunked_uploads WHERE expires_at < ?")
            .bind(Utc::now())
            .fetch_all(&self.pool)
            .await?;
        let count = expired.len();
        for (id,) in expired {
            if let Err(e) = self.remove_session(&id).await {
                slog::warn!(self.logger, "expired session cleanup failed"; "id" => &id, "error" => %e);
            }
        }
        if count > 0 {
            slog::info!(self.logger, "swept {} expired upload sessions", count);
        }
        Ok(count)
    }
}

async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
