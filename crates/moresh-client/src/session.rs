//! PeerSession — the client negotiation state machine.
//!
//! ```text
//! Disconnected -> Registered -> Negotiating -> Established -> Closed | Failed
//! ```
//!
//! The session is driven by three inputs: relay link events, negotiator
//! events, and caller commands. Every step is synchronous; suspension only
//! happens in the driver between steps. Closed and Failed are terminal, and an
//! explicit disconnect discards the session. A new session is needed to
//! negotiate again.

use crate::chat::{ChatChannel, ChatEvent};
use crate::error::{ChatError, LinkError};
use crate::link::{LinkSender, RelayEvent};
use crate::negotiator::{ChannelNegotiator, EventSender, NegotiatorEvent, NegotiatorFactory, Role};
use moresh_types::ConnectionKey;
use moresh_wire::{ClientEnvelope, RelayEnvelope};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`PeerSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Registered,
    Negotiating,
    Established,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Registered => write!(f, "registered"),
            SessionState::Negotiating => write!(f, "connecting"),
            SessionState::Established => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Failed => write!(f, "error"),
        }
    }
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// The session moved to a new state.
    State(SessionState),
    /// Human-readable status or error text.
    Diagnostic(String),
    /// The direct channel is up; chat may begin.
    Established {
        local_key: ConnectionKey,
        remote_key: String,
    },
    /// A local message went out over the channel, as sent.
    Sent(String),
    /// Inbound chat traffic.
    Chat(ChatEvent),
    /// The remote-typing flag changed.
    RemoteTyping(bool),
}

/// Client-side negotiation state for one local key.
pub struct PeerSession {
    local_key: ConnectionKey,
    remote_key: Option<String>,
    role: Option<Role>,
    state: SessionState,
    /// Remote key requested before the relay confirmed registration.
    pending_remote: Option<ConnectionKey>,
    /// Signals relayed before the registration acknowledgement arrived.
    early_signals: Vec<(Option<String>, serde_json::Value)>,
    link: Option<LinkSender>,
    negotiator: Option<Box<dyn ChannelNegotiator>>,
    chat: Option<ChatChannel>,
    factory: Arc<dyn NegotiatorFactory>,
    negotiator_tx: EventSender,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    ended: bool,
}

impl PeerSession {
    /// Create a session over an open relay link.
    ///
    /// Negotiator events must be delivered back through
    /// [`PeerSession::handle_negotiator`]; `negotiator_tx` is the sender
    /// handed to every negotiator this session creates.
    pub fn new(
        local_key: ConnectionKey,
        link: LinkSender,
        factory: Arc<dyn NegotiatorFactory>,
        negotiator_tx: EventSender,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Self {
        Self {
            local_key,
            remote_key: None,
            role: None,
            state: SessionState::Disconnected,
            pending_remote: None,
            early_signals: Vec::new(),
            link: Some(link),
            negotiator: None,
            chat: None,
            factory,
            negotiator_tx,
            updates,
            ended: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn local_key(&self) -> &ConnectionKey {
        &self.local_key
    }

    pub fn remote_key(&self) -> Option<&str> {
        self.remote_key.as_deref()
    }

    pub fn chat(&self) -> Option<&ChatChannel> {
        self.chat.as_ref()
    }

    /// Whether the session has been torn down and its driver should stop.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Send the registration request for the local key.
    pub fn start(&mut self) {
        let envelope = ClientEnvelope::Register {
            connection_key: self.local_key.to_string(),
        };
        if let Err(e) = self.send_relay(envelope) {
            self.fail(format!("Relay link error: {e}"));
        }
    }

    /// Begin negotiating with `remote_key` as initiator.
    ///
    /// Before the relay has confirmed registration the request is held and
    /// started as soon as the confirmation arrives.
    pub fn connect(&mut self, remote_key: ConnectionKey) {
        match self.state {
            SessionState::Disconnected => {
                debug!(remote = %remote_key, "Connect requested before registration");
                self.pending_remote = Some(remote_key);
                self.diagnostic("Waiting for signaling server...");
            }
            SessionState::Registered => self.begin_initiator(remote_key),
            SessionState::Negotiating | SessionState::Established => {
                self.diagnostic("Already connecting to a peer");
            }
            SessionState::Closed | SessionState::Failed => {
                self.diagnostic("Session has ended");
            }
        }
    }

    /// Process one relay link event.
    pub fn handle_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Envelope(RelayEnvelope::Registered { connection_key }) => {
                self.on_registered(connection_key)
            }
            RelayEvent::Envelope(RelayEnvelope::Signal { from, data }) => self.on_signal(from, data),
            RelayEvent::Envelope(RelayEnvelope::Error { message }) => {
                warn!(key = %self.local_key, "Relay error: {}", message);
                self.diagnostic(format!("Error: {message}"));
            }
            RelayEvent::Error(reason) => {
                warn!(key = %self.local_key, "Relay link error: {}", reason);
                self.diagnostic(format!("Relay link error: {reason}"));
            }
            RelayEvent::Closed => {
                self.link = None;
                let before_connect = matches!(
                    self.state,
                    SessionState::Disconnected | SessionState::Registered | SessionState::Negotiating
                );
                if !self.ended && before_connect {
                    self.diagnostic("Disconnected from signaling server");
                    self.fail("Relay link closed before the peer connected".to_string());
                }
            }
        }
    }

    /// Process one negotiator event.
    pub fn handle_negotiator(&mut self, event: NegotiatorEvent) {
        match self.state {
            SessionState::Negotiating => self.on_negotiation_event(event),
            SessionState::Established => self.on_channel_event(event, Instant::now()),
            _ => debug!(state = %self.state, "Ignoring negotiator event {:?}", event),
        }
    }

    /// Send a chat message over the established channel.
    ///
    /// A delivered message is echoed as [`SessionUpdate::Sent`]; a refused
    /// send is reported as a diagnostic as well as returned.
    pub fn send_message(&mut self, text: &str) -> Result<(), ChatError> {
        let result = match (&mut self.chat, self.state) {
            (Some(chat), SessionState::Established) => chat.send_message(text),
            _ => Err(ChatError::NotEstablished),
        };
        match result {
            Ok(sent) => {
                self.emit(SessionUpdate::Sent(sent));
                Ok(())
            }
            Err(e) => {
                self.diagnostic(e.to_string());
                Err(e)
            }
        }
    }

    /// Send a typing marker if the channel is established.
    pub fn send_typing(&mut self) {
        if self.state != SessionState::Established {
            return;
        }
        if let Some(chat) = &mut self.chat {
            chat.send_typing();
        }
    }

    /// When the remote-typing flag will drop, if set.
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.chat.as_ref().and_then(|chat| chat.typing().deadline())
    }

    /// Drop the remote-typing flag if its window has passed.
    pub fn expire_typing(&mut self, now: Instant) {
        let expired = self
            .chat
            .as_mut()
            .is_some_and(|chat| chat.typing_mut().expire(now));
        if expired {
            self.emit(SessionUpdate::RemoteTyping(false));
        }
    }

    /// Tear everything down and return to `Disconnected`.
    pub fn disconnect(&mut self) {
        if self.ended {
            return;
        }
        info!(key = %self.local_key, "Session disconnected by user");
        self.release();
        self.remote_key = None;
        self.role = None;
        self.pending_remote = None;
        self.early_signals.clear();
        self.set_state(SessionState::Disconnected);
        self.ended = true;
    }

    fn on_registered(&mut self, connection_key: String) {
        if self.state != SessionState::Disconnected {
            debug!(key = %connection_key, "Duplicate registration acknowledgement");
            return;
        }
        info!(key = %self.local_key, "Registered with relay");
        self.set_state(SessionState::Registered);
        self.diagnostic("Registered with signaling server");
        for (from, payload) in std::mem::take(&mut self.early_signals) {
            if self.ended {
                return;
            }
            self.on_signal(from, payload);
        }
        if let Some(remote) = self.pending_remote.take() {
            self.connect(remote);
        }
    }

    fn on_signal(&mut self, from: Option<String>, payload: serde_json::Value) {
        match self.state {
            SessionState::Registered => {
                let Some(from) = from.filter(|f| !f.is_empty()) else {
                    self.diagnostic("Ignoring signal from an unregistered peer");
                    return;
                };
                self.begin_responder(from, payload);
            }
            SessionState::Negotiating => self.feed(payload),
            SessionState::Disconnected if !self.ended => {
                debug!("Holding signal until registration is acknowledged");
                self.early_signals.push((from, payload));
            }
            _ => debug!(state = %self.state, "Ignoring relayed signal"),
        }
    }

    fn begin_initiator(&mut self, remote: ConnectionKey) {
        info!(key = %self.local_key, remote = %remote, "Connecting to peer as initiator");
        if self.create_negotiator(Role::Initiator, remote.to_string()) {
            self.diagnostic("Connecting to peer...");
        }
    }

    fn begin_responder(&mut self, from: String, payload: serde_json::Value) {
        info!(key = %self.local_key, remote = %from, "Incoming connection, responding");
        if self.create_negotiator(Role::Responder, from) {
            self.feed(payload);
        }
    }

    /// Create the session's single negotiator and enter `Negotiating`.
    fn create_negotiator(&mut self, role: Role, remote: String) -> bool {
        if self.negotiator.is_some() || self.chat.is_some() {
            warn!("Negotiator already exists, not creating another");
            return false;
        }
        match self.factory.create(role, self.negotiator_tx.clone()) {
            Ok(negotiator) => {
                self.negotiator = Some(negotiator);
                self.role = Some(role);
                self.remote_key = Some(remote);
                self.set_state(SessionState::Negotiating);
                true
            }
            Err(e) => {
                self.fail(format!("Peer error: {e}"));
                false
            }
        }
    }

    fn feed(&mut self, payload: serde_json::Value) {
        let Some(negotiator) = &mut self.negotiator else {
            return;
        };
        if let Err(e) = negotiator.feed(payload) {
            self.fail(format!("Peer error: {e}"));
        }
    }

    fn on_negotiation_event(&mut self, event: NegotiatorEvent) {
        match event {
            NegotiatorEvent::Signal(payload) => {
                let Some(target) = self.remote_key.clone() else {
                    return;
                };
                let envelope = ClientEnvelope::Signal {
                    target,
                    data: payload,
                };
                if let Err(e) = self.send_relay(envelope) {
                    self.diagnostic(format!("Failed to relay signal: {e}"));
                }
            }
            NegotiatorEvent::Connected => self.establish(),
            NegotiatorEvent::Error(reason) => self.fail(format!("Peer error: {reason}")),
            NegotiatorEvent::Closed => {
                self.fail("Peer error: channel closed during negotiation".to_string())
            }
            NegotiatorEvent::Data(_) => debug!("Dropping channel data received before connect"),
        }
    }

    fn establish(&mut self) {
        let Some(negotiator) = self.negotiator.take() else {
            return;
        };
        let remote_key = self.remote_key.clone().unwrap_or_default();
        info!(key = %self.local_key, remote = %remote_key, "Connected with peer");
        self.chat = Some(ChatChannel::new(negotiator));
        // The direct channel no longer needs the relay.
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.set_state(SessionState::Established);
        self.diagnostic("Connected with peer!");
        self.emit(SessionUpdate::Established {
            local_key: self.local_key.clone(),
            remote_key,
        });
    }

    fn on_channel_event(&mut self, event: NegotiatorEvent, now: Instant) {
        let Some(chat) = &mut self.chat else {
            return;
        };
        let was_typing = chat.remote_typing(now);
        let Some(chat_event) = chat.translate(event, now) else {
            return;
        };
        let is_typing = chat.remote_typing(now);
        if was_typing != is_typing {
            self.emit(SessionUpdate::RemoteTyping(is_typing));
        }
        self.emit(SessionUpdate::Chat(chat_event.clone()));

        match chat_event {
            ChatEvent::Closed => {
                info!(key = %self.local_key, "Peer channel closed");
                self.release();
                self.set_state(SessionState::Closed);
                self.ended = true;
            }
            ChatEvent::Error(reason) => {
                self.fail(format!("Peer error: {reason}"));
            }
            ChatEvent::Typing | ChatEvent::Message(_) => {}
        }
    }

    fn fail(&mut self, reason: String) {
        if self.ended {
            return;
        }
        warn!(key = %self.local_key, "Session failed: {}", reason);
        self.release();
        self.diagnostic(reason);
        self.set_state(SessionState::Failed);
        self.ended = true;
    }

    /// Close the negotiator or channel and the relay link together.
    fn release(&mut self) {
        if let Some(mut negotiator) = self.negotiator.take() {
            negotiator.close();
        }
        if let Some(chat) = &mut self.chat {
            chat.close();
        }
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }

    fn send_relay(&self, envelope: ClientEnvelope) -> Result<(), LinkError> {
        match &self.link {
            Some(link) => link.send(envelope),
            None => Err(LinkError::Closed),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(key = %self.local_key, from = %self.state, to = %state, "Session state change");
            self.state = state;
            self.emit(SessionUpdate::State(state));
        }
    }

    fn diagnostic(&self, text: impl Into<String>) {
        self.emit(SessionUpdate::Diagnostic(text.into()));
    }

    fn emit(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::link::RelayLink;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::Mutex;

    /// What the mock negotiators saw.
    #[derive(Default)]
    struct Record {
        created: Vec<Role>,
        fed: Vec<serde_json::Value>,
        sent: Vec<Bytes>,
        closed: usize,
    }

    struct MockNegotiator(Arc<Mutex<Record>>);

    impl ChannelNegotiator for MockNegotiator {
        fn feed(&mut self, payload: serde_json::Value) -> Result<(), TransportError> {
            self.0.lock().unwrap().fed.push(payload);
            Ok(())
        }

        fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
            self.0.lock().unwrap().sent.push(data);
            Ok(())
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed += 1;
        }
    }

    struct MockFactory(Arc<Mutex<Record>>);

    impl NegotiatorFactory for MockFactory {
        fn create(
            &self,
            role: Role,
            _events: EventSender,
        ) -> Result<Box<dyn ChannelNegotiator>, TransportError> {
            self.0.lock().unwrap().created.push(role);
            Ok(Box::new(MockNegotiator(self.0.clone())))
        }
    }

    struct Harness {
        session: PeerSession,
        record: Arc<Mutex<Record>>,
        relay_out: mpsc::UnboundedReceiver<ClientEnvelope>,
        updates: mpsc::UnboundedReceiver<SessionUpdate>,
        _relay_in: mpsc::UnboundedSender<RelayEvent>,
    }

    impl Harness {
        fn new(local: &str) -> Self {
            let (out_tx, relay_out) = mpsc::unbounded_channel();
            let (relay_in, in_rx) = mpsc::unbounded_channel();
            let (sender, _events) = RelayLink::from_channels(out_tx, in_rx).into_parts();
            let (neg_tx, _neg_rx) = mpsc::unbounded_channel();
            let (updates_tx, updates) = mpsc::unbounded_channel();
            let record = Arc::new(Mutex::new(Record::default()));
            let session = PeerSession::new(
                ConnectionKey::parse(local).unwrap(),
                sender,
                Arc::new(MockFactory(record.clone())),
                neg_tx,
                updates_tx,
            );
            Self {
                session,
                record,
                relay_out,
                updates,
                _relay_in: relay_in,
            }
        }

        fn registered(&mut self) {
            self.session.start();
            let key = self.session.local_key().to_string();
            self.session
                .handle_relay(RelayEvent::Envelope(RelayEnvelope::Registered {
                    connection_key: key,
                }));
        }

        fn signal_from(&mut self, from: &str, data: serde_json::Value) {
            self.session
                .handle_relay(RelayEvent::Envelope(RelayEnvelope::Signal {
                    from: Some(from.to_string()),
                    data,
                }));
        }

        fn sent(&mut self) -> Vec<ClientEnvelope> {
            let mut out = Vec::new();
            while let Ok(env) = self.relay_out.try_recv() {
                out.push(env);
            }
            out
        }

        fn updates(&mut self) -> Vec<SessionUpdate> {
            let mut out = Vec::new();
            while let Ok(update) = self.updates.try_recv() {
                out.push(update);
            }
            out
        }

        fn states(&mut self) -> Vec<SessionState> {
            self.updates()
                .into_iter()
                .filter_map(|u| match u {
                    SessionUpdate::State(s) => Some(s),
                    _ => None,
                })
                .collect()
        }

        fn establish_as_responder(&mut self) {
            self.registered();
            self.signal_from("bob45678", json!({"type": "offer"}));
            self.session.handle_negotiator(NegotiatorEvent::Connected);
            self.sent();
            self.updates();
        }
    }

    #[test]
    fn test_start_registers_local_key() {
        let mut h = Harness::new("alice123");
        h.session.start();
        assert_eq!(
            h.sent(),
            vec![ClientEnvelope::Register {
                connection_key: "alice123".to_string()
            }]
        );
        assert_eq!(h.session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_registered_acknowledgement() {
        let mut h = Harness::new("alice123");
        h.registered();
        assert_eq!(h.session.state(), SessionState::Registered);
        assert_eq!(h.states(), vec![SessionState::Registered]);
    }

    #[test]
    fn test_initiator_waits_for_registration() {
        let mut h = Harness::new("bob45678");
        h.session.start();
        h.session.connect(ConnectionKey::parse("alice123").unwrap());
        assert!(h.record.lock().unwrap().created.is_empty());
        assert_eq!(h.session.state(), SessionState::Disconnected);

        h.session
            .handle_relay(RelayEvent::Envelope(RelayEnvelope::Registered {
                connection_key: "bob45678".to_string(),
            }));
        assert_eq!(h.record.lock().unwrap().created, vec![Role::Initiator]);
        assert_eq!(h.session.state(), SessionState::Negotiating);
        assert_eq!(
            h.states(),
            vec![SessionState::Registered, SessionState::Negotiating]
        );
    }

    #[test]
    fn test_signal_before_registered_ack_is_replayed() {
        let mut h = Harness::new("alice123");
        h.session.start();
        h.signal_from("bob45678", json!({"type": "offer"}));
        assert!(h.record.lock().unwrap().created.is_empty());
        assert_eq!(h.session.state(), SessionState::Disconnected);

        h.session
            .handle_relay(RelayEvent::Envelope(RelayEnvelope::Registered {
                connection_key: "alice123".to_string(),
            }));
        let record = h.record.lock().unwrap();
        assert_eq!(record.created, vec![Role::Responder]);
        assert_eq!(record.fed, vec![json!({"type": "offer"})]);
        drop(record);

        assert_eq!(h.session.remote_key(), Some("bob45678"));
        assert_eq!(h.session.state(), SessionState::Negotiating);
    }

    #[test]
    fn test_early_signals_dropped_on_disconnect() {
        let mut h = Harness::new("alice123");
        h.session.start();
        h.signal_from("bob45678", json!({"type": "offer"}));
        h.session.disconnect();
        h.session
            .handle_relay(RelayEvent::Envelope(RelayEnvelope::Registered {
                connection_key: "alice123".to_string(),
            }));
        assert!(h.record.lock().unwrap().created.is_empty());
    }

    #[test]
    fn test_initiator_relays_signals_to_remote() {
        let mut h = Harness::new("bob45678");
        h.registered();
        h.sent();
        h.session.connect(ConnectionKey::parse("alice123").unwrap());
        h.session
            .handle_negotiator(NegotiatorEvent::Signal(json!({"type": "offer", "sdp": "x"})));

        assert_eq!(
            h.sent(),
            vec![ClientEnvelope::Signal {
                target: "alice123".to_string(),
                data: json!({"type": "offer", "sdp": "x"}),
            }]
        );

        // The answer is fed to the same negotiator
        h.signal_from("alice123", json!({"type": "answer"}));
        let record = h.record.lock().unwrap();
        assert_eq!(record.created.len(), 1);
        assert_eq!(record.fed, vec![json!({"type": "answer"})]);
    }

    #[test]
    fn test_responder_created_once_and_fed_in_order() {
        let mut h = Harness::new("alice123");
        h.registered();
        h.signal_from("bob45678", json!({"n": 1}));
        h.signal_from("bob45678", json!({"n": 2}));
        h.signal_from("bob45678", json!({"n": 3}));

        let record = h.record.lock().unwrap();
        assert_eq!(record.created, vec![Role::Responder]);
        assert_eq!(record.fed, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
        drop(record);

        assert_eq!(h.session.role(), Some(Role::Responder));
        assert_eq!(h.session.remote_key(), Some("bob45678"));
        assert_eq!(h.session.state(), SessionState::Negotiating);
    }

    #[test]
    fn test_responder_replies_to_sender() {
        let mut h = Harness::new("alice123");
        h.registered();
        h.sent();
        h.signal_from("bob45678", json!({"type": "offer"}));
        h.session
            .handle_negotiator(NegotiatorEvent::Signal(json!({"type": "answer"})));

        assert_eq!(
            h.sent(),
            vec![ClientEnvelope::Signal {
                target: "bob45678".to_string(),
                data: json!({"type": "answer"}),
            }]
        );
    }

    #[test]
    fn test_established_only_after_negotiation() {
        let mut h = Harness::new("alice123");
        h.session.handle_negotiator(NegotiatorEvent::Connected);
        assert_eq!(h.session.state(), SessionState::Disconnected);

        h.registered();
        h.session.handle_negotiator(NegotiatorEvent::Connected);
        assert_eq!(h.session.state(), SessionState::Registered);

        h.signal_from("bob45678", json!({}));
        h.session.handle_negotiator(NegotiatorEvent::Connected);
        assert_eq!(h.session.state(), SessionState::Established);

        let updates = h.updates();
        assert!(updates.contains(&SessionUpdate::Established {
            local_key: ConnectionKey::parse("alice123").unwrap(),
            remote_key: "bob45678".to_string(),
        }));
        assert_eq!(
            updates
                .iter()
                .filter_map(|u| match u {
                    SessionUpdate::State(s) => Some(*s),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            vec![
                SessionState::Registered,
                SessionState::Negotiating,
                SessionState::Established
            ]
        );
    }

    #[test]
    fn test_negotiation_error_fails_without_retry() {
        let mut h = Harness::new("alice123");
        h.registered();
        h.signal_from("bob45678", json!({}));
        h.session
            .handle_negotiator(NegotiatorEvent::Error("ice failed".to_string()));

        assert_eq!(h.session.state(), SessionState::Failed);
        assert!(h.session.is_ended());
        assert!(h
            .updates()
            .contains(&SessionUpdate::Diagnostic("Peer error: ice failed".to_string())));

        // Later signals do not create another negotiator
        h.signal_from("bob45678", json!({}));
        let record = h.record.lock().unwrap();
        assert_eq!(record.created.len(), 1);
        assert_eq!(record.closed, 1);
    }

    #[test]
    fn test_relay_error_is_diagnostic_only() {
        let mut h = Harness::new("alice123");
        h.registered();
        h.updates();
        h.session
            .handle_relay(RelayEvent::Envelope(RelayEnvelope::Error {
                message: "Target peer not found".to_string(),
            }));
        assert_eq!(h.session.state(), SessionState::Registered);
        assert_eq!(
            h.updates(),
            vec![SessionUpdate::Diagnostic(
                "Error: Target peer not found".to_string()
            )]
        );
    }

    #[test]
    fn test_relay_close_before_connect_fails_session() {
        let mut h = Harness::new("alice123");
        h.registered();
        h.session.handle_relay(RelayEvent::Closed);
        assert_eq!(h.session.state(), SessionState::Failed);
    }

    #[test]
    fn test_disconnect_mid_negotiation_releases_everything() {
        let mut h = Harness::new("alice123");
        h.registered();
        h.signal_from("bob45678", json!({}));
        h.session.disconnect();

        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert!(h.session.is_ended());
        assert_eq!(h.session.remote_key(), None);
        assert_eq!(h.record.lock().unwrap().closed, 1);
        // Relay link sender dropped
        h.sent();
        assert!(h.relay_out.try_recv().is_err());
        assert!(matches!(
            h.relay_out.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_established_closes_relay_link() {
        let mut h = Harness::new("alice123");
        h.establish_as_responder();
        assert!(matches!(
            h.relay_out.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        // Relay closing afterwards does not affect the channel
        h.session.handle_relay(RelayEvent::Closed);
        assert_eq!(h.session.state(), SessionState::Established);
    }

    #[test]
    fn test_chat_events_after_established() {
        let mut h = Harness::new("alice123");
        h.establish_as_responder();

        h.session
            .handle_negotiator(NegotiatorEvent::Data(Bytes::from_static(b"__TYPING__")));
        h.session
            .handle_negotiator(NegotiatorEvent::Data(Bytes::from_static(b"hi")));
        assert_eq!(
            h.updates(),
            vec![
                SessionUpdate::RemoteTyping(true),
                SessionUpdate::Chat(ChatEvent::Typing),
                SessionUpdate::RemoteTyping(false),
                SessionUpdate::Chat(ChatEvent::Message("hi".to_string())),
            ]
        );

        h.session.handle_negotiator(NegotiatorEvent::Closed);
        assert_eq!(h.session.state(), SessionState::Closed);
        assert!(h.session.is_ended());
    }

    #[test]
    fn test_send_message_requires_established() {
        let mut h = Harness::new("alice123");
        h.registered();
        h.updates();
        assert!(matches!(
            h.session.send_message("hi"),
            Err(ChatError::NotEstablished)
        ));
        assert_eq!(
            h.updates(),
            vec![SessionUpdate::Diagnostic("Not connected to a peer".to_string())]
        );

        h.signal_from("bob45678", json!({}));
        h.session.handle_negotiator(NegotiatorEvent::Connected);
        h.updates();
        tokio_test::assert_ok!(h.session.send_message(" hi "));
        tokio_test::assert_err!(h.session.send_message("   "));
        assert_eq!(h.record.lock().unwrap().sent, vec![Bytes::from("hi")]);
        assert_eq!(
            h.updates(),
            vec![
                SessionUpdate::Sent("hi".to_string()),
                SessionUpdate::Diagnostic("Message is empty".to_string()),
            ]
        );
    }

    #[test]
    fn test_typing_only_when_established() {
        let mut h = Harness::new("alice123");
        h.registered();
        h.session.send_typing();
        assert!(h.record.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn test_channel_error_after_established() {
        let mut h = Harness::new("alice123");
        h.establish_as_responder();
        h.session
            .handle_negotiator(NegotiatorEvent::Error("connection reset".to_string()));
        let updates = h.updates();
        assert!(updates.contains(&SessionUpdate::Chat(ChatEvent::Error(
            "connection reset".to_string()
        ))));
        assert!(updates.contains(&SessionUpdate::State(SessionState::Failed)));
    }
}
