use datashare_common::error::StorageError;

/// An error while encoding or decoding a protocol message.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The item is not a well-formed protocol message.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The message was written for another protocol version.
    #[error("Unsupported protocol version {found}, expected {expected}")]
    VersionMismatch { expected: u64, found: u64 },
    /// The message belongs to another namespace.
    #[error("Message belongs to the foreign namespace {0}")]
    ForeignNamespace(String),
    /// A `select` without patterns or a `solution-data` without data.
    #[error("Message is missing its {0} payload")]
    MissingPayload(&'static str),
}

/// An error of the messaging substrate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MessagingError {
    /// The channel does not exist (anymore).
    #[error("The channel {0} is closed")]
    ChannelClosed(String),
    /// No channel can be opened to the peer.
    #[error("The peer {0} is unknown")]
    UnknownPeer(String),
    /// The message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<MessagingError> for StorageError {
    fn from(error: MessagingError) -> Self {
        StorageError::Channel(Box::new(error))
    }
}
