//! Per-link protocol dispatcher.
//!
//! A [`RelayConnection`] processes the frames of one relay link in arrival
//! order. Failures are answered with an `error` envelope on the same link and
//! never affect other links.

use crate::message::{encode, parse_inbound, ForwardEnvelope, Inbound, RelayEnvelope};
use crate::registry::{LinkHandle, Registry};
use moresh_types::RelayError;
use serde_json::value::RawValue;
use tracing::{debug, error, info, warn};

/// Protocol state of a single relay link.
pub struct RelayConnection {
    link: LinkHandle,
    registry: Registry,
    /// Keys this link registered, most recent last.
    keys: Vec<String>,
}

impl RelayConnection {
    pub fn new(link: LinkHandle, registry: Registry) -> Self {
        Self {
            link,
            registry,
            keys: Vec::new(),
        }
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    /// The key this link's signals are sent from.
    pub fn bound_key(&self) -> Option<&str> {
        self.keys.last().map(String::as_str)
    }

    /// Handle one inbound text frame.
    pub fn handle_frame(&mut self, text: &str) {
        if let Err(e) = self.dispatch(text) {
            debug!(
                peer = self.bound_key().unwrap_or("unregistered"),
                error = %e,
                "Rejected frame"
            );
            self.reply(&RelayEnvelope::Error {
                message: e.to_string(),
            });
        }
    }

    fn dispatch(&mut self, text: &str) -> Result<(), RelayError> {
        match parse_inbound(text)? {
            Inbound::Register { connection_key } => {
                self.register(connection_key);
                Ok(())
            }
            Inbound::Signal { target, data } => self.signal(target, data),
        }
    }

    fn register(&mut self, key: String) {
        let reply: ForwardEnvelope = RelayEnvelope::Registered {
            connection_key: key.clone(),
        };
        let ack = match encode(&reply) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(error = %e, "Failed to encode registered reply");
                None
            }
        };
        // The ack goes out under the registry lock, ahead of any signal
        // routed to the new binding.
        if let Some(evicted) = self.registry.register(&key, &self.link, ack) {
            info!(
                key = %key,
                evicted = %evicted.id(),
                "Replaced existing registration"
            );
        }
        self.keys.retain(|k| k != &key);
        self.keys.push(key.clone());
        info!(key = %key, link = %self.link.id(), "Registered peer");
    }

    fn signal(
        &mut self,
        target: Option<String>,
        data: Option<Box<RawValue>>,
    ) -> Result<(), RelayError> {
        let target = target.ok_or(RelayError::TargetNotFound)?;
        let envelope: ForwardEnvelope = RelayEnvelope::Signal {
            from: self.bound_key().map(str::to_string),
            data,
        };
        let frame = match encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode signal envelope");
                return Ok(());
            }
        };
        self.registry.route(&target, frame)?;
        debug!(
            from = self.bound_key().unwrap_or("unregistered"),
            to = %target,
            "Signal forwarded"
        );
        Ok(())
    }

    fn reply(&self, envelope: &ForwardEnvelope) {
        match encode(envelope) {
            Ok(frame) => {
                if !self.link.send_frame(frame) {
                    debug!(link = %self.link.id(), "Reply dropped, link closed");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode reply"),
        }
    }

    /// Log a transport-level error. Registry entries are left to [`Self::release`].
    pub fn observe_error(&self, err: &dyn std::fmt::Display) {
        warn!(
            peer = self.bound_key().unwrap_or("unknown peer"),
            error = %err,
            "Relay link error"
        );
    }

    /// Drop every registration still bound to this link.
    pub fn release(self) {
        for key in &self.keys {
            if self.registry.unregister(key, self.link.id()) {
                info!(key = %key, "Disconnected");
            }
        }
        self.link.close();
    }
}
