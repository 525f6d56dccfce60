//! Error types for the blob store.

use std::path::PathBuf;

/// A convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// An error that might be returned from one of the blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An identifier did not have the required length or contained
    /// characters outside `[0-9a-fA-F]`.
    #[error("invalid blob identifier: {0}")]
    BadIdentifier(String),

    /// A construction parameter was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested digest algorithm is not available.
    #[error(transparent)]
    UnknownAlgorithm(#[from] blobstore_digest::UnknownAlgorithmError),

    /// An operation was invoked after the store was closed.
    #[error("the blob store has been closed")]
    StoreClosed,

    /// A path that must be a directory exists as something else.
    #[error("'{0}' exists but is not a directory")]
    NotADirectory(PathBuf),

    /// An underlying filesystem operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
