//! Client-side error types.

use moresh_types::KeyError;
use thiserror::Error;

/// Relay link failures.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Invalid relay URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Failed to connect to relay: {0}")]
    Connect(String),
    #[error("Relay link closed")]
    Closed,
}

/// Failures reported by a channel negotiator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid negotiation payload: {0}")]
    InvalidSignal(String),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("Channel closed")]
    Closed,
}

/// A refused chat send.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Not connected to a peer")]
    NotEstablished,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Message text is reserved")]
    ReservedText,
    #[error("Failed to send message: {0}")]
    Transport(#[from] TransportError),
}

/// Errors returned by the session API.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("Session has ended")]
    SessionEnded,
}
