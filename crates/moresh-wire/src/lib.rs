//! Moresh relay protocol — signaling between peers that cannot reach each other.
//!
//! Peers register under self-chosen connection keys and exchange opaque
//! negotiation payloads through the relay until their direct channel is up.
//! Frames are JSON text messages over a WebSocket, one envelope per frame.
//!
//! ## Architecture
//!
//! - **ClientEnvelope / RelayEnvelope**: JSON envelopes in each direction
//! - **Registry**: maps connection keys to the live link of each peer
//! - **RelayConnection**: per-link dispatcher for register/signal frames
//! - **RelayServer**: WebSocket listener that runs one dispatcher per link

pub mod handler;
pub mod message;
pub mod registry;
pub mod server;

pub use handler::RelayConnection;
pub use message::{ClientEnvelope, Inbound, RelayEnvelope};
pub use registry::{LinkHandle, Outbound, Registry, RegistryEntry};
pub use server::{RelayServer, WireError};
