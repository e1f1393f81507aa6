//! Contains the [`ObjectStore`] trait that can be implemented to provide content storage for
//! libhaven.
//!
//! An object store is a flat, byte-addressed key→blob namespace. libhaven layers the
//! path-addressed namespace, versioning and trash semantics on top of it; a back-end only needs
//! to provide the capability set defined here. Pre-made implementations exist in this workspace
//! (search for `haven-sbe-`) and you can define your own to integrate libhaven with whatever
//! storage mechanism you prefer.
//!
//! To create a new back-end:
//!
//! 1. Declare dependencies on the async-trait, tokio, bytes and haven-core crates:
//!
//! ```toml
//! async-trait = "0.1.88"
//! tokio = { version = "1.49.0", features = ["full"] }
//! bytes = "1"
//! haven-core = { path = "../path/to/haven-core" }
//! ```
//!
//! 2. Implement the [`ObjectStore`] trait:
//!
//! ```no_run
//! use async_trait::async_trait;
//! use haven_core::storage::{ObjectRead, ObjectStore, Result};
//!
//! #[derive(Debug)]
//! pub struct Blobs {}
//!
//! #[async_trait]
//! impl ObjectStore for Blobs {
//!     fn kind(&self) -> &str {
//!         "blobs"
//!     }
//!
//!     async fn get(&self, key: &str, offset: u64, length: u64) -> Result<ObjectRead> {
//!         unimplemented!()
//!     }
//!
//!     async fn put(&self, key: &str, data: Box<dyn tokio::io::AsyncRead + Send + Sync + Unpin>, length: u64) -> Result<u64> {
//!         unimplemented!()
//!     }
//!
//!     async fn delete(&self, key: &str) -> Result<()> {
//!         unimplemented!()
//!     }
//!
//!     async fn copy(&self, src: &str, dst: &str) -> Result<()> {
//!         unimplemented!()
//!     }
//!
//!     async fn exists(&self, key: &str) -> Result<bool> {
//!         unimplemented!()
//!     }
//! }
//! ```
//!
//! 3. Register it with the storage router in your application.

mod error;
pub use error::{Error, ErrorKind};

mod object_store;
pub use object_store::{ObjectRead, ObjectStore, Result, validate_key};
