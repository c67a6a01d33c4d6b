//! Signaling wire protocol exchanged over the relay's WebSocket text frames.
//!
//! Two kinds of JSON object travel on the wire:
//!
//! - [`ServerMessage`]: produced by the relay itself to announce identifiers
//!   and peer arrivals/departures. Tagged by a `type` field.
//! - [`Envelope`]: an opaque, peer-authored object routed by its `targetId`.
//!   The relay adds a `senderId` and otherwise forwards it untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::peer::PeerId;

/// Name of the discriminator field every message carries.
pub const TYPE_FIELD: &str = "type";
/// Name of the field a peer sets to address another peer.
pub const TARGET_ID_FIELD: &str = "targetId";
/// Name of the field the relay stamps onto forwarded envelopes.
pub const SENDER_ID_FIELD: &str = "senderId";

/// Error type for signaling encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text was not valid JSON, or did not match the expected shape.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The text was valid JSON but not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Messages originated by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// The identifier just assigned to the receiving connection.
    YourId {
        /// The receiver's own identifier.
        id: PeerId,
    },

    /// Snapshot of the other peers present when the receiver joined.
    ///
    /// Never sent with an empty list.
    ExistingPeers {
        /// Identifiers of every other registered peer.
        peer_ids: Vec<PeerId>,
    },

    /// Another peer just joined.
    NewPeer {
        /// Identifier of the new peer.
        peer_id: PeerId,
    },

    /// A peer just left.
    PeerDisconnected {
        /// Identifier of the departed peer.
        peer_id: PeerId,
    },
}

/// Encodes a [`ServerMessage`] as a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails.
pub fn encode(msg: &ServerMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decodes a [`ServerMessage`] from a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Json` if the text is not a known relay message.
pub fn decode(text: &str) -> Result<ServerMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// A peer-authored message routed by the relay.
///
/// Any JSON object is a valid envelope. Only `type`, `targetId` and
/// `senderId` have meaning to the relay; every other field is carried
/// verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Creates an envelope carrying only a `type` discriminator.
    #[must_use]
    pub fn new(message_type: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_string(), Value::String(message_type.to_string()));
        Self(fields)
    }

    /// Parses an envelope from a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Json` for invalid JSON and
    /// `CodecError::NotAnObject` for JSON that is not an object.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(CodecError::NotAnObject(json_kind(&other))),
        }
    }

    /// Serializes the envelope back into a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Json` if serialization fails.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// The `type` discriminator, if present and a string.
    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        self.0.get(TYPE_FIELD).and_then(Value::as_str)
    }

    /// The raw `targetId` value, whatever its JSON type.
    #[must_use]
    pub fn target_field(&self) -> Option<&Value> {
        self.0.get(TARGET_ID_FIELD)
    }

    /// The addressed peer, if `targetId` is spelled exactly as the relay
    /// issues identifiers.
    #[must_use]
    pub fn target_id(&self) -> Option<PeerId> {
        self.target_field()?.as_str()?.parse().ok()
    }

    /// The relay-stamped sender, if present and well-formed.
    #[must_use]
    pub fn sender_id(&self) -> Option<PeerId> {
        self.0.get(SENDER_ID_FIELD)?.as_str()?.parse().ok()
    }

    /// Sets `targetId`.
    #[must_use]
    pub fn with_target(mut self, target: PeerId) -> Self {
        self.0
            .insert(TARGET_ID_FIELD.to_string(), Value::String(target.to_string()));
        self
    }

    /// Sets `senderId`, replacing any value the author supplied.
    #[must_use]
    pub fn with_sender(mut self, sender: PeerId) -> Self {
        self.0
            .insert(SENDER_ID_FIELD.to_string(), Value::String(sender.to_string()));
        self
    }

    /// Sets an arbitrary field.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    /// Looks up an arbitrary field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Consumes the envelope, returning its fields.
    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

/// A frame as seen by a client of the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A message originated by the relay.
    Server(ServerMessage),
    /// A message forwarded from another peer.
    Relayed(Envelope),
}

/// Classifies a frame received from the relay.
///
/// Anything carrying `senderId` was forwarded from a peer, regardless of
/// its `type`; everything else must be a [`ServerMessage`].
///
/// # Errors
///
/// Returns a [`CodecError`] if the frame is not a JSON object, or is an
/// unstamped object that is not a known relay message.
pub fn decode_inbound(text: &str) -> Result<Inbound, CodecError> {
    let envelope = Envelope::decode(text)?;
    if envelope.get(SENDER_ID_FIELD).is_some() {
        return Ok(Inbound::Relayed(envelope));
    }
    let msg = serde_json::from_value(Value::Object(envelope.into_fields()))?;
    Ok(Inbound::Server(msg))
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
