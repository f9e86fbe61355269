//! Relay protocol envelopes.
//!
//! Every frame on a relay link is a single JSON object with a `type` field.
//! Signal payloads are opaque: the relay forwards the `data` value exactly as
//! the sender wrote it and never parses its contents.

use moresh_types::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;

/// Envelopes sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEnvelope {
    /// Bind a connection key to the sending link.
    Register {
        #[serde(rename = "connectionKey")]
        connection_key: String,
    },
    /// Forward a negotiation payload to the peer registered as `target`.
    Signal {
        target: String,
        data: serde_json::Value,
    },
}

/// Envelopes sent by the relay to a client.
///
/// `D` is the payload representation: the relay forwards raw JSON, clients
/// decode into [`serde_json::Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEnvelope<D = serde_json::Value> {
    /// Registration acknowledgement.
    Registered {
        #[serde(rename = "connectionKey")]
        connection_key: String,
    },
    /// A payload relayed from the peer registered as `from`.
    Signal {
        /// Sender's bound key; `None` when the sender never registered.
        from: Option<String>,
        #[serde(default)]
        data: D,
    },
    /// A failed request on this link.
    Error { message: String },
}

/// Outgoing relay envelope carrying an untouched payload.
pub type ForwardEnvelope = RelayEnvelope<Option<Box<RawValue>>>;

/// A decoded client frame, as seen by the relay.
#[derive(Debug)]
pub enum Inbound {
    Register {
        connection_key: String,
    },
    Signal {
        /// Target key; `None` when missing, empty or not a string.
        target: Option<String>,
        data: Option<Box<RawValue>>,
    },
}

/// How an absent `type` field is named in the error reply.
const MISSING_TYPE: &str = "undefined";

/// Decode a client frame without interpreting its signal payload.
pub fn parse_inbound(text: &str) -> Result<Inbound, RelayError> {
    let mut fields: HashMap<String, Box<RawValue>> = match serde_json::from_str(text) {
        Ok(fields) => fields,
        // Valid JSON that is not an object has no type at all.
        Err(_) if serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok() => {
            return Err(RelayError::UnknownType(MISSING_TYPE.to_string()));
        }
        Err(_) => return Err(RelayError::InvalidJson),
    };

    let kind = fields.get("type").map(|raw| decode_field(raw));
    match kind {
        Some(serde_json::Value::String(kind)) if kind == "register" => {
            match fields.get("connectionKey").and_then(|raw| non_empty_str(raw)) {
                Some(connection_key) => Ok(Inbound::Register { connection_key }),
                None => Err(RelayError::MissingConnectionKey),
            }
        }
        Some(serde_json::Value::String(kind)) if kind == "signal" => Ok(Inbound::Signal {
            target: fields.get("target").and_then(|raw| non_empty_str(raw)),
            data: fields.remove("data").filter(|raw| raw.get() != "null"),
        }),
        Some(serde_json::Value::String(other)) => Err(RelayError::UnknownType(other)),
        Some(other) => Err(RelayError::UnknownType(other.to_string())),
        None => Err(RelayError::UnknownType(MISSING_TYPE.to_string())),
    }
}

fn decode_field(raw: &RawValue) -> serde_json::Value {
    serde_json::from_str(raw.get()).unwrap_or(serde_json::Value::Null)
}

fn non_empty_str(raw: &RawValue) -> Option<String> {
    match decode_field(raw) {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Encode an envelope as a JSON text frame.
pub fn encode<T: Serialize>(envelope: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Decode a relay frame on the client side.
pub fn decode_relay(text: &str) -> Result<RelayEnvelope, serde_json::Error> {
    serde_json::from_str(text)
}
