//! The error type surfaced by libhaven operations.
//!
//! Every fallible core operation returns [`Error`]; the HTTP layer maps each variant onto a
//! status code and a `{error, code}` JSON body.

use thiserror::Error;

/// Result type used throughout libhaven.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures a core operation can surface to its caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The caller lacks permission or ownership for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The addressed entry, version, session or link does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict on a write. Carries the state the client needs to merge
    /// and retry.
    #[error("conflict on {path}: expected version {expected_version}, current {current_version}")]
    Conflict {
        /// Path the conflicting write addressed.
        path: String,
        /// Version the client expected to overwrite.
        expected_version: i64,
        /// Version currently stored.
        current_version: i64,
        /// Content hash currently stored.
        current_hash: String,
    },

    /// Upload size limit or storage quota exceeded.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// The caller was denied at admission by the rate limiter.
    #[error("rate limited")]
    RateLimited,

    /// A dependent external service is unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Metadata store failure.
    #[error("metadata store failure")]
    Db(#[from] sqlx::Error),

    /// Object store failure.
    #[error("object store failure")]
    Storage(#[from] haven_core::storage::Error),

    /// Any other internal failure fatal to the request.
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a [`Error::BadRequest`] with a formatted message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    /// Shorthand for a [`Error::Forbidden`] with a formatted message.
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Error::Forbidden(msg.into())
    }

    /// Shorthand for a [`Error::NotFound`] with a formatted message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// HTTP status code equivalent for this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Unauthenticated => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict { .. } => 409,
            Error::PayloadTooLarge(_) => 413,
            Error::RateLimited => 429,
            Error::Unavailable(_) => 503,
            Error::Db(_) | Error::Storage(_) | Error::Internal(_) => 500,
        }
    }
}
