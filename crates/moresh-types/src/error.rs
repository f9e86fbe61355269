//! Shared error types for the relay protocol.

use thiserror::Error;

/// Category of a relay-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unknown envelope.
    Protocol,
    /// Missing or invalid identifier in a `register` envelope.
    Registration,
    /// Unknown or unreachable signal target.
    Routing,
}

/// A recoverable per-frame relay failure.
///
/// The `Display` text is exactly the `message` carried by the `error`
/// envelope sent back to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The frame was not valid JSON.
    #[error("Invalid JSON")]
    InvalidJson,

    /// The `type` field named no known envelope.
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// A `register` envelope carried no usable `connectionKey`.
    #[error("Missing connectionKey")]
    MissingConnectionKey,

    /// The signal target is missing or not registered.
    #[error("Target peer not found")]
    TargetNotFound,

    /// The signal target is registered but its link is no longer open.
    #[error("Target peer not available")]
    TargetUnavailable,
}

impl RelayError {
    /// Taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::InvalidJson | RelayError::UnknownType(_) => ErrorKind::Protocol,
            RelayError::MissingConnectionKey => ErrorKind::Registration,
            RelayError::TargetNotFound | RelayError::TargetUnavailable => ErrorKind::Routing,
        }
    }
}
