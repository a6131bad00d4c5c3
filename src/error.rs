//! Error types for Slidegate.

use thiserror::Error;

/// Main error type for Slidegate operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors, including invalid policies
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by the backing store, passed through unchanged
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors a [`Store`](crate::store::Store) implementation may return.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend-specific failure, e.g. an unreachable remote cache.
    #[error("Store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A release was issued for a key that has no outstanding acquisition.
    #[error("cannot release key {key:?}: it was not acquired")]
    NotAcquired { key: String },
}

/// Result type alias for Slidegate operations.
pub type Result<T> = std::result::Result<T, Error>;
