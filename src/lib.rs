#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

//! libhaven is an extensible, async, multi-tenant file storage and collaboration server
//! library.
//!
//! It exposes a uniform path-addressed namespace over pluggable object store back-ends
//! (local filesystem, in-memory, or your own — see the `haven-sbe-*` crates) and layers
//! versioning, trash/restore, permissions, share links, quotas and background media
//! processing on top. Clients talk to it through a JSON/HTTP API, an SSE event stream and a
//! WebDAV subset.
//!
//! It runs on top of the Tokio asynchronous run-time and tries to make use of Async IO as
//! much as possible.
//!
//! # Quick Start
//!
//! Add the libhaven and tokio crates to your project's dependencies in Cargo.toml, together
//! with a storage back-end:
//!
//! ```toml
//! [dependencies]
//! libhaven = "0.4"
//! haven-sbe-fs = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Now you're ready to bring up a server:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! pub async fn main() {
//!     let backend = Arc::new(haven_sbe_fs::Filesystem::new("/srv/haven/objects").unwrap());
//!     let server = libhaven::HavenServer::builder()
//!         .database("sqlite://haven.db")
//!         .default_backend(backend)
//!         .build()
//!         .unwrap();
//!
//!     server.listen("127.0.0.1:8080").await.unwrap();
//! }
//! ```

pub mod auth;
pub mod error;
pub mod http;
pub mod media;
pub mod meta;
pub mod mime;
pub mod notify;
pub mod pathutil;
pub mod perm;
pub mod pipeline;
pub mod quota;
pub mod routing;
pub mod share;
pub mod tree;
pub mod upload;

pub mod server;

pub use crate::error::{Error, Result};
pub use crate::server::{HavenServer, ServerBuilder, ServerError};
