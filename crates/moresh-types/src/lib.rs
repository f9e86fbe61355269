//! Core types for Moresh peer-to-peer chat.
//!
//! This crate defines the shared data structures used by the relay, the
//! client state machine and the CLI: validated connection identifiers, the
//! error taxonomy, and configuration. It performs no network I/O.

pub mod config;
pub mod error;
pub mod key;

pub use error::{ErrorKind, RelayError};
pub use key::{ConnectionKey, KeyError, MIN_KEY_LEN};
