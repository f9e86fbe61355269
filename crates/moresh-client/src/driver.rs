//! Async driver for a [`PeerSession`].
//!
//! One task owns the session and feeds it relay events, negotiator events,
//! caller commands and typing-window expiry, one at a time. Callers talk to it
//! through a cloneable [`SessionHandle`].

use crate::error::SessionError;
use crate::link::{RelayEvent, RelayLink};
use crate::negotiator::{NegotiatorEvent, NegotiatorFactory};
use crate::session::{PeerSession, SessionUpdate};
use moresh_types::ConnectionKey;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Requests from the presentation layer.
#[derive(Debug)]
enum Command {
    Connect(ConnectionKey),
    SendMessage(String),
    SendTyping,
    Disconnect,
}

/// Caller side of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    local_key: ConnectionKey,
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub fn local_key(&self) -> &ConnectionKey {
        &self.local_key
    }

    /// Start negotiating with `remote_key`. The key is validated before
    /// anything is sent.
    pub fn connect(&self, remote_key: &str) -> Result<(), SessionError> {
        let remote_key = ConnectionKey::parse(remote_key)?;
        self.send(Command::Connect(remote_key))
    }

    /// Send a chat message. Refusals surface as diagnostics on the update
    /// stream.
    pub fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::SendMessage(text.into()))
    }

    pub fn send_typing(&self) -> Result<(), SessionError> {
        self.send(Command::SendTyping)
    }

    /// Tear the session down. The driver task exits afterwards.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(Command::Disconnect)
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::SessionEnded)
    }
}

/// A running session: its handle, its update stream and its driver task.
pub type SessionParts = (
    SessionHandle,
    mpsc::UnboundedReceiver<SessionUpdate>,
    JoinHandle<()>,
);

/// Validate `local_key`, connect to the relay and start a session.
///
/// A key that is too short fails before any network activity.
pub async fn open_session(
    relay_url: &str,
    local_key: &str,
    factory: Arc<dyn NegotiatorFactory>,
) -> Result<SessionParts, SessionError> {
    let local_key = ConnectionKey::parse(local_key)?;
    let link = RelayLink::connect(relay_url).await?;
    info!(key = %local_key.short(), relay = %relay_url, "Opening session");
    Ok(spawn_session(local_key, link, factory))
}

/// Run a session over an already-open relay link.
pub fn spawn_session(
    local_key: ConnectionKey,
    link: RelayLink,
    factory: Arc<dyn NegotiatorFactory>,
) -> SessionParts {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let (negotiator_tx, negotiator_rx) = mpsc::unbounded_channel();
    let (sender, relay_events) = link.into_parts();

    let session = PeerSession::new(
        local_key.clone(),
        sender,
        factory,
        negotiator_tx,
        updates_tx,
    );
    let task = tokio::spawn(run(session, relay_events, negotiator_rx, commands_rx));

    let handle = SessionHandle {
        local_key,
        commands: commands_tx,
    };
    (handle, updates_rx, task)
}

/// What woke the driver.
enum Wake {
    Relay(Option<RelayEvent>),
    Negotiator(Option<NegotiatorEvent>),
    Command(Option<Command>),
    TypingExpired,
}

async fn run(
    mut session: PeerSession,
    mut relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    mut negotiator_events: mpsc::UnboundedReceiver<NegotiatorEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    session.start();
    let mut relay_open = true;

    while !session.is_ended() {
        let deadline = session.typing_deadline();
        let sleep_target = deadline
            .map(tokio::time::Instant::from_std)
            .unwrap_or_else(tokio::time::Instant::now);

        let wake = tokio::select! {
            event = relay_events.recv(), if relay_open => Wake::Relay(event),
            event = negotiator_events.recv() => Wake::Negotiator(event),
            command = commands.recv() => Wake::Command(command),
            _ = tokio::time::sleep_until(sleep_target), if deadline.is_some() => Wake::TypingExpired,
        };

        match wake {
            Wake::Relay(Some(event)) => session.handle_relay(event),
            Wake::Relay(None) => relay_open = false,
            Wake::Negotiator(Some(event)) => session.handle_negotiator(event),
            Wake::Negotiator(None) => break,
            Wake::Command(Some(command)) => apply(&mut session, command),
            Wake::Command(None) => {
                debug!("All session handles dropped");
                session.disconnect();
            }
            Wake::TypingExpired => session.expire_typing(std::time::Instant::now()),
        }
    }

    debug!(key = %session.local_key().short(), state = %session.state(), "Session driver finished");
}

fn apply(session: &mut PeerSession, command: Command) {
    match command {
        Command::Connect(remote_key) => session.connect(remote_key),
        Command::SendMessage(text) => {
            // Refusals are already reported as diagnostics.
            let _ = session.send_message(&text);
        }
        Command::SendTyping => session.send_typing(),
        Command::Disconnect => session.disconnect(),
    }
}
