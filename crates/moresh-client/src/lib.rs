//! Moresh client — from relay registration to an established peer channel.
//!
//! A [`PeerSession`] owns one relay link and at most one channel negotiator.
//! It registers the local key, exchanges negotiation payloads with the remote
//! peer through the relay (as initiator or responder), and once the direct
//! channel reports connected hands chat traffic to a [`ChatChannel`].
//!
//! [`open_session`] runs a session on its own task and returns a
//! [`SessionHandle`] plus a stream of [`SessionUpdate`]s for the presentation
//! layer.

pub mod chat;
pub mod driver;
pub mod error;
pub mod link;
pub mod negotiator;
pub mod session;
pub mod tcp;

pub use chat::{ChatChannel, ChatEvent, ChatLine, TypingIndicator, TYPING_SENTINEL};
pub use driver::{open_session, spawn_session, SessionHandle, SessionParts};
pub use error::{ChatError, LinkError, SessionError, TransportError};
pub use link::{LinkSender, RelayEvent, RelayLink};
pub use negotiator::{ChannelNegotiator, NegotiatorEvent, NegotiatorFactory, Role};
pub use session::{PeerSession, SessionState, SessionUpdate};
pub use tcp::TcpNegotiatorFactory;
