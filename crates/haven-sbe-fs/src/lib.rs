//! A libhaven [`ObjectStore`] that keeps objects as plain files under a root directory on local
//! disk.
//!
//! Keys map one-to-one onto paths below the root, so `docs/report.pdf` lives at
//! `<root>/docs/report.pdf`. Writes are atomic: content goes to a sibling temp file first and is
//! renamed over the destination only once fully written.
//!
//! ```no_run
//! let store = haven_sbe_fs::Filesystem::new("/srv/haven/objects").unwrap();
//! ```

use async_trait::async_trait;
use haven_core::storage::{Error, ErrorKind, ObjectRead, ObjectStore, Result, validate_key};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};

/// An [`ObjectStore`] rooted at a directory on the local filesystem.
#[derive(Debug)]
pub struct Filesystem {
    root: PathBuf,
}

impl Filesystem {
    /// Creates a new filesystem store with the given root. The directory is created if it does
    /// not exist. No operation can take place outside of the root.
    pub fn new<P: Into<PathBuf>>(root: P) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Filesystem { root })
    }

    /// The root directory this store operates under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for Filesystem {
    fn kind(&self) -> &str {
        "filesystem"
    }

    #[tracing_attributes::instrument]
    async fn get(&self, key: &str, offset: u64, length: u64) -> Result<ObjectRead> {
        let path = self.full_path(key)?;
        let mut file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();

        // Offset past the end yields an empty stream rather than an error.
        if offset >= size {
            return Ok(ObjectRead {
                stream: Box::new(tokio::io::empty()),
                length: 0,
            });
        }
        let remaining = size - offset;
        let span = if length == 0 { remaining } else { length.min(remaining) };
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await?;
        }
        let limited = tokio::io::AsyncReadExt::take(file, span);
        Ok(ObjectRead {
            stream: Box::new(tokio::io::BufReader::with_capacity(64 * 1024, limited)),
            length: span,
        })
    }

    async fn put(&self, key: &str, data: Box<dyn AsyncRead + Send + Sync + Unpin>, length: u64) -> Result<u64> {
        let path = self.full_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a sibling temp file and rename so a torn write is never observable under the
        // destination key.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let result = write_then_rename(&tmp, &path, data, length).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }

    #[tracing_attributes::instrument]
    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.full_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing_attributes::instrument]
    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let from = self.full_path(src)?;
        let to = self.full_path(dst)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Copy through a temp sibling as well; tokio::fs::copy truncates the target in place.
        let tmp = to.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::copy(&from, &tmp).await?;
        tokio::fs::rename(&tmp, &to).await?;
        Ok(())
    }

    #[tracing_attributes::instrument]
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.full_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

async fn write_then_rename(tmp: &Path, dst: &Path, data: Box<dyn AsyncRead + Send + Sync + Unpin>, length: u64) -> Result<u64> {
    let file = tokio::fs::File::create(tmp).await?;
    let mut reader = tokio::io::BufReader::with_capacity(64 * 1024, data);
    let mut writer = tokio::io::BufWriter::with_capacity(64 * 1024, file);
    let written = tokio::io::copy(&mut reader, &mut writer).await?;
    if written != length {
        return Err(Error::new(
            ErrorKind::Local,
            format!("short body: got {written} bytes, declared {length}"),
        ));
    }
    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    tokio::fs::rename(tmp, dst).await?;
    Ok(written)
}
