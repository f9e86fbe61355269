//! Client side of a relay link.
//!
//! [`RelayLink::connect`] opens a WebSocket to the relay and runs one reader
//! and one writer task. Outgoing envelopes go through a [`LinkSender`];
//! decoded relay frames arrive as [`RelayEvent`]s in order.

use crate::error::LinkError;
use futures::{SinkExt, StreamExt};
use moresh_wire::message::{decode_relay, encode};
use moresh_wire::{ClientEnvelope, RelayEnvelope};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

/// Something that happened on the relay link.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A decoded envelope from the relay.
    Envelope(RelayEnvelope),
    /// An undecodable frame or a transport error.
    Error(String),
    /// The link is gone. Always the last event.
    Closed,
}

/// Outgoing half of a relay link.
#[derive(Debug)]
pub struct LinkSender {
    tx: Option<mpsc::UnboundedSender<ClientEnvelope>>,
}

impl LinkSender {
    /// Queue an envelope for the relay.
    pub fn send(&self, envelope: ClientEnvelope) -> Result<(), LinkError> {
        let tx = self.tx.as_ref().ok_or(LinkError::Closed)?;
        tx.send(envelope).map_err(|_| LinkError::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Close the link after queued envelopes are written.
    pub fn close(&mut self) {
        self.tx.take();
    }
}

/// A relay link: outgoing sender plus incoming event stream.
pub struct RelayLink {
    pub sender: LinkSender,
    pub events: mpsc::UnboundedReceiver<RelayEvent>,
}

impl RelayLink {
    /// Connect to the relay at `url`.
    pub async fn connect(url: &str) -> Result<Self, LinkError> {
        let parsed = url::Url::parse(url).map_err(|e| LinkError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(LinkError::InvalidUrl {
                url: url.to_string(),
                reason: "scheme must be ws or wss".to_string(),
            });
        }

        let (ws, _) = connect_async(parsed.as_str())
            .await
            .map_err(|e| LinkError::Connect(e.to_string()))?;
        debug!("Relay link connected to {}", parsed);
        let (mut write, mut read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEnvelope>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let frame = match encode(&envelope) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Failed to encode relay envelope: {}", e);
                        continue;
                    }
                };
                trace!("Relay link send: {}", frame);
                if write.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => match decode_relay(&text) {
                        Ok(envelope) => RelayEvent::Envelope(envelope),
                        Err(e) => RelayEvent::Error(format!("Invalid relay frame: {e}")),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = event_tx.send(RelayEvent::Error(e.to_string()));
                        break;
                    }
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
            let _ = event_tx.send(RelayEvent::Closed);
            debug!("Relay link reader finished");
        });

        Ok(Self::from_channels(out_tx, event_rx))
    }

    /// Build a link from raw channels (in-process relays and tests).
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<ClientEnvelope>,
        events: mpsc::UnboundedReceiver<RelayEvent>,
    ) -> Self {
        Self {
            sender: LinkSender { tx: Some(outbound) },
            events,
        }
    }

    pub fn into_parts(self) -> (LinkSender, mpsc::UnboundedReceiver<RelayEvent>) {
        (self.sender, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_bad_urls() {
        assert!(matches!(
            RelayLink::connect("not a url").await,
            Err(LinkError::InvalidUrl { .. })
        ));
        assert!(matches!(
            RelayLink::connect("http://127.0.0.1:8080").await,
            Err(LinkError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_sender_after_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_event_tx, event_rx) = mpsc::unbounded_channel();
        let link = RelayLink::from_channels(tx, event_rx);
        let (mut sender, _events) = link.into_parts();

        sender
            .send(ClientEnvelope::Register {
                connection_key: "alice123".to_string(),
            })
            .unwrap();
        assert!(rx.try_recv().is_ok());

        sender.close();
        assert!(!sender.is_open());
        assert!(matches!(
            sender.send(ClientEnvelope::Register {
                connection_key: "alice123".to_string(),
            }),
            Err(LinkError::Closed)
        ));
    }
}
