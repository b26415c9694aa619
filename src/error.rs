use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PortmeshError>;

/// Errors raised by the connection cache, the durable store and the reconciler.
#[derive(Debug, Error)]
pub enum PortmeshError {
    /// Malformed caller input, rejected before any store call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The fast store rejected or failed a transaction.
    #[error("fast store error: {0}")]
    Store(String),
    /// SQLite error from the durable store or the SQLite cache backend.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A record that was expected to exist is missing.
    #[error("{0} not found")]
    NotFound(String),
    /// Stored data could not be decoded.
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl PortmeshError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        PortmeshError::InvalidArgument(msg.into())
    }

    /// Whether a caller may retry the failed operation unchanged.
    ///
    /// Store and I/O failures are treated as transient; malformed input,
    /// missing records and corrupt data are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PortmeshError::Store(_) | PortmeshError::Sqlite(_) | PortmeshError::Io(_)
        )
    }
}
