//! Defines the service provider interface for object store back-end implementors.

use super::error::{Error, ErrorKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::{fmt::Debug, result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Result type used by traits in this module.
pub type Result<T> = result::Result<T, Error>;

/// A readable object returned by [`ObjectStore::get`]: the byte stream and the number of bytes
/// it will yield.
pub struct ObjectRead {
    /// Stream over the requested byte range.
    pub stream: Box<dyn AsyncRead + Send + Sync + Unpin>,
    /// Exact length of the stream in bytes.
    pub length: u64,
}

impl ObjectRead {
    /// Drains the stream into memory. Intended for small objects and tests; large downloads
    /// should forward the stream instead.
    pub async fn into_bytes(mut self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(self.length as usize);
        self.stream.read_to_end(&mut buf).await?;
        Ok(buf.into())
    }
}

impl Debug for ObjectRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRead").field("length", &self.length).finish()
    }
}

/// The `ObjectStore` trait can be implemented to provide content storage for libhaven. Once
/// implemented it needs to be registered with the storage router.
///
/// Keys are opaque, `/`-separated identifiers assigned by the caller. Implementations must be
/// safe for concurrent use; a shared instance serves every request that resolves to it.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// A short identifier for the back-end type, e.g. `"filesystem"`.
    fn kind(&self) -> &str;

    /// Returns a byte range of the object at `key`.
    ///
    /// An `offset` at or past the end of the object yields an empty stream. A `length` of `0`
    /// means "the remainder from `offset`". The returned [`ObjectRead::length`] is the exact
    /// number of bytes the stream will produce.
    async fn get(&self, key: &str, offset: u64, length: u64) -> Result<ObjectRead>;

    /// Stores `length` bytes read from `data` at `key`, replacing any previous object.
    ///
    /// `put` MUST be atomic: after a successful return the key holds exactly the given bytes,
    /// and after a failure the key is either absent or still holds its previous bytes. Partial
    /// writes must never be observable. Re-putting the same bytes at the same key is
    /// idempotent.
    async fn put(&self, key: &str, data: Box<dyn AsyncRead + Send + Sync + Unpin>, length: u64) -> Result<u64>;

    /// Removes the object at `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Copies the object at `src` to `dst` within the store.
    async fn copy(&self, src: &str, dst: &str) -> Result<()>;

    /// Tells whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Reads the whole object at `key` into memory. Intended for small objects such as
    /// thumbnails and test fixtures.
    async fn get_bytes(&self, key: &str) -> Result<Bytes> {
        self.get(key, 0, 0).await?.into_bytes().await
    }

    /// Stores an in-memory buffer at `key`. See [`ObjectStore::put`] for the atomicity
    /// contract.
    async fn put_bytes(&self, key: &str, data: Bytes) -> Result<u64> {
        let len = data.len() as u64;
        self.put(key, Box::new(std::io::Cursor::new(data)), len).await
    }
}

/// Validates a storage key: rejects empty keys, absolute keys and `.`/`..` traversal
/// components. Back-ends call this before touching the underlying medium.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') {
        return Err(ErrorKind::KeyNotAllowed.into());
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(ErrorKind::KeyNotAllowed.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("a/b/c.txt").is_ok());
        assert!(validate_key("_versions/docs/report.pdf/3").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("./a").is_err());
    }
}
