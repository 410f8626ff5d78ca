use thiserror::Error;

/// Failure talking to a queue transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker is unreachable or the connection dropped. Consumer loops
    /// back off and reconnect on this variant.
    #[error("transport connection error: {0}")]
    Connection(String),

    /// The broker answered but refused the command.
    #[error("transport command failed: {0}")]
    Command(String),

    /// An outgoing message could not be encoded.
    #[error("message serialization failed: {0}")]
    Serialization(String),

    /// An incoming message could not be decoded. Never retried.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The transport was shut down.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn is_connection(&self) -> bool {
        matches!(self, TransportError::Connection(_) | TransportError::Closed)
    }
}
