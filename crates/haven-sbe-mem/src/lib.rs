//! A libhaven [`ObjectStore`] that keeps all objects in process memory.
//!
//! Everything is lost when the process exits, which makes this back-end suitable for tests and
//! for ephemeral scratch locations, not for durable storage.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use haven_core::storage::{Error, ErrorKind, ObjectRead, ObjectStore, Result, validate_key};
use tokio::io::{AsyncRead, AsyncReadExt};

/// An [`ObjectStore`] backed by a concurrent in-memory map.
#[derive(Debug, Default)]
pub struct InMemory {
    objects: DashMap<String, Bytes>,
}

impl InMemory {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently held.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `self.len() == 0`.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemory {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str, offset: u64, length: u64) -> Result<ObjectRead> {
        validate_key(key)?;
        let body = self.objects.get(key).map(|e| e.value().clone()).ok_or(ErrorKind::KeyNotFound)?;
        let size = body.len() as u64;
        if offset >= size {
            return Ok(ObjectRead {
                stream: Box::new(tokio::io::empty()),
                length: 0,
            });
        }
        let remaining = size - offset;
        let span = if length == 0 { remaining } else { length.min(remaining) };
        let slice = body.slice(offset as usize..(offset + span) as usize);
        Ok(ObjectRead {
            stream: Box::new(std::io::Cursor::new(slice)),
            length: span,
        })
    }

    async fn put(&self, key: &str, mut data: Box<dyn AsyncRead + Send + Sync + Unpin>, length: u64) -> Result<u64> {
        validate_key(key)?;
        let mut buf = Vec::with_capacity(length as usize);
        data.read_to_end(&mut buf).await?;
        if buf.len() as u64 != length {
            // Leave the previous object untouched on a short or oversized body.
            return Err(Error::new(
                ErrorKind::Local,
                format!("short body: got {} bytes, declared {length}", buf.len()),
            ));
        }
        self.objects.insert(key.to_string(), buf.into());
        Ok(length)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.objects.remove(key);
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        validate_key(src)?;
        validate_key(dst)?;
        let body = self.objects.get(src).map(|e| e.value().clone()).ok_or(ErrorKind::KeyNotFound)?;
        self.objects.insert(dst.to_string(), body);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.objects.contains_key(key))
    }
}
