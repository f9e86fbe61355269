//! The channel negotiator seam.
//!
//! A negotiator is the opaque transport that turns exchanged signal payloads
//! into a direct peer channel. The session never looks inside payloads; it
//! only forwards them and reacts to the fixed set of [`NegotiatorEvent`]s the
//! negotiator reports on its event channel.

use crate::error::TransportError;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Which side of the negotiation a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Produces the first signal.
    Initiator,
    /// Created by the first signal it receives.
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Events reported by a negotiator.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiatorEvent {
    /// A payload that must reach the remote negotiator.
    Signal(serde_json::Value),
    /// The direct channel is usable.
    Connected,
    /// Bytes received over the direct channel.
    Data(Bytes),
    /// The negotiation or the channel failed.
    Error(String),
    /// The remote side closed the channel.
    Closed,
}

/// Sender half negotiators report their events on.
pub type EventSender = mpsc::UnboundedSender<NegotiatorEvent>;

/// Handle to one negotiation and, once connected, its channel.
pub trait ChannelNegotiator: Send {
    /// Feed a payload produced by the remote negotiator.
    fn feed(&mut self, payload: serde_json::Value) -> Result<(), TransportError>;

    /// Send bytes over the established channel.
    fn send(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Tear down the negotiation or channel. Reports no further events.
    fn close(&mut self);
}

/// Creates negotiators for sessions.
pub trait NegotiatorFactory: Send + Sync {
    fn create(
        &self,
        role: Role,
        events: EventSender,
    ) -> Result<Box<dyn ChannelNegotiator>, TransportError>;
}
