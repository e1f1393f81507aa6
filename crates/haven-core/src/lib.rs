//! Core traits and types shared between libhaven and its object store back-ends.

pub mod storage;

/// A convenience alias for boxed dynamic errors carried as error sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
