//! Direct TCP channel negotiator.
//!
//! The initiator binds a listener and signals `{"type":"offer","addr":..}`.
//! The responder connects to that address and signals `{"type":"answer"}`.
//! Both sides report [`NegotiatorEvent::Connected`] once the stream is up.
//!
//! Frames on the stream are a 4-byte big-endian length followed by the raw
//! message bytes.

use crate::error::TransportError;
use crate::negotiator::{ChannelNegotiator, EventSender, NegotiatorEvent, NegotiatorFactory, Role};
use bytes::Bytes;
use moresh_types::config::ClientConfig;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Maximum frame size on a direct channel (1 MiB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Negotiation payloads exchanged through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TcpSignal {
    /// Initiator is listening at `addr`.
    Offer { addr: String },
    /// Responder accepted the offer and is connecting.
    Answer,
}

/// Creates [`TcpNegotiator`]s.
#[derive(Debug, Clone)]
pub struct TcpNegotiatorFactory {
    bind_host: String,
    advertise_host: String,
}

impl TcpNegotiatorFactory {
    pub fn new(bind_host: impl Into<String>, advertise_host: impl Into<String>) -> Self {
        Self {
            bind_host: bind_host.into(),
            advertise_host: advertise_host.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.bind_host.clone(), config.advertise_host.clone())
    }
}

impl Default for TcpNegotiatorFactory {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl NegotiatorFactory for TcpNegotiatorFactory {
    fn create(
        &self,
        role: Role,
        events: EventSender,
    ) -> Result<Box<dyn ChannelNegotiator>, TransportError> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let mut negotiator = TcpNegotiator {
            role,
            events,
            outbound: Some(outbound),
            outbound_rx: Some(outbound_rx),
            shutdown,
        };
        if role == Role::Initiator {
            negotiator.listen(&self.bind_host, &self.advertise_host)?;
        }
        Ok(Box::new(negotiator))
    }
}

/// One direct TCP negotiation and, once connected, its channel.
pub struct TcpNegotiator {
    role: Role,
    events: EventSender,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    /// Taken by the channel task once a stream exists.
    outbound_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    shutdown: watch::Sender<bool>,
}

impl TcpNegotiator {
    /// Bind a listener and emit the offer signal.
    fn listen(&mut self, bind_host: &str, advertise_host: &str) -> Result<(), TransportError> {
        let std_listener = std::net::TcpListener::bind((bind_host, 0))?;
        std_listener.set_nonblocking(true)?;
        let port = std_listener.local_addr()?.port();
        let listener = TcpListener::from_std(std_listener)?;
        let addr = format!("{advertise_host}:{port}");
        info!(addr = %addr, "Direct channel listening");

        let offer = serde_json::to_value(TcpSignal::Offer { addr })
            .map_err(|e| TransportError::InvalidSignal(e.to_string()))?;
        let _ = self.events.send(NegotiatorEvent::Signal(offer));

        let outbound_rx = self.take_outbound()?;
        let events = self.events.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Direct channel listener closed before a peer connected");
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        info!(peer = %peer_addr, "Direct channel accepted");
                        run_channel(stream, events, outbound_rx, shutdown).await;
                    }
                    Err(e) => {
                        warn!("Direct channel accept failed: {}", e);
                        let _ = events.send(NegotiatorEvent::Error(e.to_string()));
                    }
                },
            }
        });
        Ok(())
    }

    /// Connect to an offered address and emit the answer signal.
    fn dial(&mut self, addr: String) -> Result<(), TransportError> {
        let outbound_rx = self.take_outbound()?;
        let answer = serde_json::to_value(TcpSignal::Answer)
            .map_err(|e| TransportError::InvalidSignal(e.to_string()))?;
        let events = self.events.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Direct channel dial cancelled");
                }
                connected = TcpStream::connect(addr.as_str()) => match connected {
                    Ok(stream) => {
                        info!(addr = %addr, "Direct channel connected");
                        let _ = events.send(NegotiatorEvent::Signal(answer));
                        run_channel(stream, events, outbound_rx, shutdown).await;
                    }
                    Err(e) => {
                        warn!(addr = %addr, "Direct channel connect failed: {}", e);
                        let _ = events.send(NegotiatorEvent::Error(e.to_string()));
                    }
                },
            }
        });
        Ok(())
    }

    fn take_outbound(&mut self) -> Result<mpsc::UnboundedReceiver<Bytes>, TransportError> {
        self.outbound_rx
            .take()
            .ok_or_else(|| TransportError::InvalidSignal("negotiation already started".to_string()))
    }
}

impl ChannelNegotiator for TcpNegotiator {
    fn feed(&mut self, payload: serde_json::Value) -> Result<(), TransportError> {
        let signal: TcpSignal = serde_json::from_value(payload)
            .map_err(|e| TransportError::InvalidSignal(e.to_string()))?;
        match (self.role, signal) {
            (Role::Responder, TcpSignal::Offer { addr }) => self.dial(addr),
            (Role::Initiator, TcpSignal::Answer) => {
                debug!("Direct channel answer received");
                Ok(())
            }
            (role, signal) => Err(TransportError::InvalidSignal(format!(
                "unexpected {signal:?} for {role}"
            ))),
        }
    }

    fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        if data.len() > MAX_FRAME_SIZE as usize {
            return Err(TransportError::FrameTooLarge {
                size: u32::try_from(data.len()).unwrap_or(u32::MAX),
                max: MAX_FRAME_SIZE,
            });
        }
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(data).map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        // Dropping the sender lets the writer flush and shut the stream down.
        self.outbound.take();
        self.shutdown.send_replace(true);
    }
}

impl Drop for TcpNegotiator {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drive an established stream until either side closes it.
async fn run_channel(
    stream: TcpStream,
    events: EventSender,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let _ = events.send(NegotiatorEvent::Connected);

    tokio::spawn(async move {
        while let Some(data) = outbound.recv().await {
            if let Err(e) = write_frame(&mut writer, &data).await {
                debug!("Direct channel write failed: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(data)) => {
                    if events.send(NegotiatorEvent::Data(data)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Direct channel closed by peer");
                    let _ = events.send(NegotiatorEvent::Closed);
                    break;
                }
                Err(e) => {
                    warn!("Direct channel read failed: {}", e);
                    let _ = events.send(NegotiatorEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), TransportError> {
    let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut bytes = Vec::with_capacity(4 + data.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(data);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. `Ok(None)` means a clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Bytes>, TransportError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::Io(e)),
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(Bytes::from(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<NegotiatorEvent>) -> NegotiatorEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for negotiator event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_frame_roundtrip_and_eof() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"hello").await.unwrap();
        write_frame(&mut a, b"").await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b).await.unwrap(), Some(Bytes::from("hello")));
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(Bytes::new()));
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_SIZE + 1).to_be_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_signal_shapes() {
        assert_eq!(
            serde_json::to_value(TcpSignal::Offer {
                addr: "127.0.0.1:4000".to_string()
            })
            .unwrap(),
            json!({"type": "offer", "addr": "127.0.0.1:4000"})
        );
        assert_eq!(
            serde_json::to_value(TcpSignal::Answer).unwrap(),
            json!({"type": "answer"})
        );
    }

    #[tokio::test]
    async fn test_initiator_and_responder_connect() {
        let factory = TcpNegotiatorFactory::new("127.0.0.1", "127.0.0.1");
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();

        let mut initiator = factory.create(Role::Initiator, a_tx).unwrap();
        let offer = match next_event(&mut a_rx).await {
            NegotiatorEvent::Signal(offer) => offer,
            other => panic!("expected offer, got {other:?}"),
        };
        assert_eq!(offer["type"], "offer");

        let mut responder = factory.create(Role::Responder, b_tx).unwrap();
        responder.feed(offer).unwrap();

        let answer = match next_event(&mut b_rx).await {
            NegotiatorEvent::Signal(answer) => answer,
            other => panic!("expected answer, got {other:?}"),
        };
        assert_eq!(next_event(&mut b_rx).await, NegotiatorEvent::Connected);
        initiator.feed(answer).unwrap();
        assert_eq!(next_event(&mut a_rx).await, NegotiatorEvent::Connected);

        initiator.send(Bytes::from("hi")).unwrap();
        assert_eq!(
            next_event(&mut b_rx).await,
            NegotiatorEvent::Data(Bytes::from("hi"))
        );
        responder.send(Bytes::from("hello back")).unwrap();
        assert_eq!(
            next_event(&mut a_rx).await,
            NegotiatorEvent::Data(Bytes::from("hello back"))
        );

        initiator.close();
        assert_eq!(next_event(&mut b_rx).await, NegotiatorEvent::Closed);
        assert!(matches!(
            initiator.send(Bytes::from("late")),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_unexpected_payloads_rejected() {
        let factory = TcpNegotiatorFactory::new("127.0.0.1", "127.0.0.1");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut responder = factory.create(Role::Responder, tx).unwrap();
        assert!(matches!(
            responder.feed(json!({"type": "answer"})),
            Err(TransportError::InvalidSignal(_))
        ));
        assert!(matches!(
            responder.feed(json!({"sdp": "v=0"})),
            Err(TransportError::InvalidSignal(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_failure_reports_error() {
        // Grab a free port, then release it so nothing is listening there.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let factory = TcpNegotiatorFactory::new("127.0.0.1", "127.0.0.1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut responder = factory.create(Role::Responder, tx).unwrap();
        responder
            .feed(json!({"type": "offer", "addr": addr.to_string()}))
            .unwrap();
        assert!(matches!(next_event(&mut rx).await, NegotiatorEvent::Error(_)));
    }
}
