use crate::BoxError;
use derive_more::Display;
use thiserror::Error;

/// The Error returned by object store back-ends. Back-end implementations should choose the
/// `ErrorKind` carefully since it determines how the write pipeline and the HTTP layer react to
/// the failure.
#[derive(Debug, Error)]
#[error("object store error: {kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Creates a new object store error wrapping an underlying cause.
    pub fn new<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error {
            kind,
            source: Some(error.into()),
        }
    }

    /// The category of this failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Attempts to get a reference to the inner `std::io::Error` if there is one.
    pub fn get_io_error(&self) -> Option<&std::io::Error> {
        self.source.as_ref()?.downcast_ref::<std::io::Error>()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }
}

/// The `ErrorKind` variants that can be produced by [`ObjectStore`] implementations.
///
/// [`ObjectStore`]: trait.ObjectStore.html
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ErrorKind {
    /// The requested key does not exist in the store. Callers treat this as not-found rather than
    /// as a fault of the store.
    #[display("key not found")]
    KeyNotFound,
    /// The store refused access to the key. Returned for example when the underlying filesystem
    /// denies the server process.
    #[display("permission denied")]
    PermissionDenied,
    /// The store ran out of space while writing. A `put` failing with this kind leaves the key
    /// unchanged per the atomicity contract.
    #[display("insufficient storage")]
    InsufficientStorage,
    /// The key contains characters or traversal components the store cannot accept.
    #[display("key not allowed")]
    KeyNotAllowed,
    /// A transient failure; the operation may succeed when retried.
    #[display("transient failure")]
    Transient,
    /// A local, non-retryable failure in the back-end.
    #[display("local error")]
    Local,
}

// Maps IO errors onto store error kinds. Permanent failures are captured explicitly; everything
// else is assumed retryable.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::new(ErrorKind::KeyNotFound, err),
            std::io::ErrorKind::PermissionDenied => Error::new(ErrorKind::PermissionDenied, err),
            std::io::ErrorKind::StorageFull => Error::new(ErrorKind::InsufficientStorage, err),
            std::io::ErrorKind::InvalidInput => Error::new(ErrorKind::KeyNotAllowed, err),
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionAborted => {
                Error::new(ErrorKind::Transient, err)
            }
            _ => Error::new(ErrorKind::Local, err),
        }
    }
}
