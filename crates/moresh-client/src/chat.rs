//! Chat over an established peer channel.
//!
//! [`ChatChannel`] turns raw channel events into chat events, sends chat and
//! typing markers, and keeps the ephemeral transcript of the conversation.

use crate::error::ChatError;
use crate::negotiator::{ChannelNegotiator, NegotiatorEvent};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;

/// Reserved channel message that marks "peer is typing".
pub const TYPING_SENTINEL: &str = "__TYPING__";

/// How long a typing marker keeps the remote-typing flag set.
pub const TYPING_WINDOW: Duration = Duration::from_secs(3);

/// Inbound chat events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The peer sent a typing marker.
    Typing,
    /// The peer sent a chat message.
    Message(String),
    /// The channel closed.
    Closed,
    /// The channel failed.
    Error(String),
}

/// Timed "remote is typing" flag.
#[derive(Debug, Clone, Default)]
pub struct TypingIndicator {
    until: Option<Instant>,
}

impl TypingIndicator {
    /// A typing marker arrived: the flag holds for [`TYPING_WINDOW`] from `now`.
    pub fn on_typing(&mut self, now: Instant) {
        self.until = Some(now + TYPING_WINDOW);
    }

    /// A chat message arrived: the flag clears immediately.
    pub fn on_message(&mut self) {
        self.until = None;
    }

    pub fn is_typing(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now < until)
    }

    /// When the flag will drop, if it is set.
    pub fn deadline(&self) -> Option<Instant> {
        self.until
    }

    /// Clear the flag if its window has passed. Returns `true` if it cleared.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.until {
            Some(until) if now >= until => {
                self.until = None;
                true
            }
            _ => false,
        }
    }
}

/// Who wrote a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    Local,
    Remote,
    System,
}

/// One line of the in-memory transcript.
#[derive(Debug, Clone)]
pub struct ChatLine {
    pub author: Author,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Chat adapter over an established channel.
pub struct ChatChannel {
    channel: Box<dyn ChannelNegotiator>,
    typing: TypingIndicator,
    transcript: Vec<ChatLine>,
    open: bool,
}

impl ChatChannel {
    pub fn new(channel: Box<dyn ChannelNegotiator>) -> Self {
        Self {
            channel,
            typing: TypingIndicator::default(),
            transcript: Vec::new(),
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Send a chat message. Returns the trimmed text that was sent.
    pub fn send_message(&mut self, text: &str) -> Result<String, ChatError> {
        if !self.open {
            return Err(ChatError::NotEstablished);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text == TYPING_SENTINEL {
            return Err(ChatError::ReservedText);
        }
        if let Err(e) = self.channel.send(Bytes::copy_from_slice(text.as_bytes())) {
            let err = ChatError::from(e);
            self.push(Author::System, err.to_string());
            return Err(err);
        }
        self.push(Author::Local, text.to_string());
        Ok(text.to_string())
    }

    /// Best-effort typing marker.
    pub fn send_typing(&mut self) {
        if !self.open {
            return;
        }
        if let Err(e) = self.channel.send(Bytes::from_static(TYPING_SENTINEL.as_bytes())) {
            debug!("Typing marker dropped: {}", e);
        }
    }

    /// Translate a channel event into a chat event.
    pub fn translate(&mut self, event: NegotiatorEvent, now: Instant) -> Option<ChatEvent> {
        match event {
            NegotiatorEvent::Data(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                if text == TYPING_SENTINEL {
                    self.typing.on_typing(now);
                    Some(ChatEvent::Typing)
                } else {
                    self.typing.on_message();
                    self.push(Author::Remote, text.clone());
                    Some(ChatEvent::Message(text))
                }
            }
            NegotiatorEvent::Closed => {
                self.open = false;
                self.typing.on_message();
                Some(ChatEvent::Closed)
            }
            NegotiatorEvent::Error(reason) => {
                self.open = false;
                self.typing.on_message();
                self.push(Author::System, format!("Peer error: {reason}"));
                Some(ChatEvent::Error(reason))
            }
            NegotiatorEvent::Signal(_) | NegotiatorEvent::Connected => None,
        }
    }

    pub fn remote_typing(&self, now: Instant) -> bool {
        self.typing.is_typing(now)
    }

    pub fn typing(&self) -> &TypingIndicator {
        &self.typing
    }

    pub fn typing_mut(&mut self) -> &mut TypingIndicator {
        &mut self.typing
    }

    pub fn transcript(&self) -> &[ChatLine] {
        &self.transcript
    }

    /// Close the underlying channel.
    pub fn close(&mut self) {
        self.open = false;
        self.channel.close();
    }

    fn push(&mut self, author: Author, text: String) {
        self.transcript.push(ChatLine {
            author,
            text,
            at: Utc::now(),
        });
    }
}
