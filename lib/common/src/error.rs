use std::error::Error;
use std::io;

/// An error related to store operations (reads, writes, remote access...).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Error from the OS I/O layer.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The store does not support the operation, e.g., writing into a remote store.
    #[error("Operation not permitted: {operation} on {uri}")]
    NotPermitted {
        /// The name of the operation.
        operation: &'static str,
        /// The URI of the store.
        uri: String,
    },
    /// The store was accessed without holding a reference.
    #[error("The store {0} is not open")]
    NotOpen(String),
    /// A remote peer reported an error while evaluating a request.
    #[error("Remote evaluation failed: {0}")]
    Remote(String),
    /// The channel to a remote peer failed.
    #[error("Channel error: {0}")]
    Channel(#[source] Box<dyn Error + Send + Sync + 'static>),
    #[error("{0}")]
    Other(#[source] Box<dyn Error + Send + Sync + 'static>),
}

impl StorageError {
    /// Creates a [StorageError::NotPermitted] for `operation` on the store `uri`.
    pub fn not_permitted(operation: &'static str, uri: impl Into<String>) -> Self {
        Self::NotPermitted {
            operation,
            uri: uri.into(),
        }
    }
}

impl From<StorageError> for io::Error {
    #[inline]
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Io(error) => error,
            StorageError::NotPermitted { .. } => {
                Self::new(io::ErrorKind::PermissionDenied, error.to_string())
            }
            StorageError::NotOpen(_) => Self::new(io::ErrorKind::NotConnected, error.to_string()),
            StorageError::Remote(_) | StorageError::Channel(_) | StorageError::Other(_) => {
                Self::other(error)
            }
        }
    }
}
