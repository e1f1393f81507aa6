//! The server: wires the components together, runs the background tasks and serves the HTTP
//! API.

pub mod shutdown;

mod haven_server;

pub use haven_server::{HavenServer, ServerBuilder, ServerError};
