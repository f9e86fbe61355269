//! Peer registry — maps connection keys to live relay links.
//!
//! The [`Registry`] is shared by every link the relay serves. All mutations
//! and routing lookups happen under one lock, so an eviction followed by a
//! re-bind is atomic with respect to a concurrent signal for the same key.

use chrono::{DateTime, Utc};
use moresh_types::RelayError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Instructions for a link's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send a text frame.
    Frame(String),
    /// Send a close frame and stop writing.
    Close,
}

/// Relay-side handle to one client connection.
///
/// Cloning yields another handle to the same link.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    id: Uuid,
    remote_addr: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<Outbound>,
    closing: Arc<AtomicBool>,
}

impl LinkHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn new(remote_addr: Option<SocketAddr>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            remote_addr,
            tx,
            closing: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether frames sent now can still reach the client.
    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a text frame. Returns `false` if the link is gone.
    pub fn send_frame(&self, frame: String) -> bool {
        self.is_open() && self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    /// Close the link. Idempotent.
    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

/// A key bound to a link.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub key: String,
    pub link: LinkHandle,
    pub registered_at: DateTime<Utc>,
}

/// Thread-safe registry of connection keys.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Arc<RwLock<HashMap<String, RegistryEntry>>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `link`, last registrant wins.
    ///
    /// An open link previously bound to the key is closed and returned.
    /// `ack` is queued on `link` before the lock is released, so no signal
    /// routed to the new binding can overtake it.
    pub fn register(
        &self,
        key: &str,
        link: &LinkHandle,
        ack: Option<String>,
    ) -> Option<LinkHandle> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let evicted = entries
            .get(key)
            .filter(|old| old.link.id() != link.id() && old.link.is_open())
            .map(|old| old.link.clone());
        if let Some(old) = &evicted {
            old.close();
        }
        entries.insert(
            key.to_string(),
            RegistryEntry {
                key: key.to_string(),
                link: link.clone(),
                registered_at: Utc::now(),
            },
        );
        if let Some(ack) = ack {
            link.send_frame(ack);
        }
        evicted
    }

    /// Deliver a frame to the link bound to `target`.
    ///
    /// A stale entry is reported as unavailable but left in place; only
    /// [`Registry::unregister`] removes entries.
    pub fn route(&self, target: &str, frame: String) -> Result<(), RelayError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(target).ok_or(RelayError::TargetNotFound)?;
        if entry.link.send_frame(frame) {
            Ok(())
        } else {
            Err(RelayError::TargetUnavailable)
        }
    }

    /// Remove `key` if it is still bound to `link_id`.
    pub fn unregister(&self, key: &str, link_id: Uuid) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.get(key).is_some_and(|e| e.link.id() == link_id) {
            entries.remove(key);
            true
        } else {
            false
        }
    }

    /// Snapshot of the entry for `key`.
    pub fn get(&self, key: &str) -> Option<RegistryEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(key)
    }

    /// All registered keys.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
