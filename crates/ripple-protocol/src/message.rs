//! Inbound client messages.
//!
//! The envelope is decoded in two steps: first into a raw `{type, payload}`
//! pair, then the payload is interpreted according to the type. Unknown
//! types are not an error; they surface as [`ClientMessage::Unknown`] so the
//! caller can log and ignore them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::ProtocolError;

/// Inbound type identifiers.
pub mod kinds {
    pub const AUTH: &str = "auth";
    pub const JOIN_ROOM: &str = "join_room";
    pub const LEAVE_ROOM: &str = "leave_room";
    pub const PING: &str = "ping";
}

/// Raw envelope shared by inbound and outbound frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RawEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Deserialize)]
struct AuthPayload {
    token: String,
}

#[derive(Deserialize)]
struct RoomPayload {
    room: String,
}

/// A message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Authenticate the connection with a token.
    Auth {
        /// Opaque token handed to the authenticator.
        token: String,
    },

    /// Join a room.
    JoinRoom {
        /// Room name.
        room: String,
    },

    /// Leave a room.
    LeaveRoom {
        /// Room name.
        room: String,
    },

    /// Client keepalive.
    Ping,

    /// A type the server does not recognize.
    Unknown(String),
}

impl ClientMessage {
    /// Get the wire type of this message.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            ClientMessage::Auth { .. } => kinds::AUTH,
            ClientMessage::JoinRoom { .. } => kinds::JOIN_ROOM,
            ClientMessage::LeaveRoom { .. } => kinds::LEAVE_ROOM,
            ClientMessage::Ping => kinds::PING,
            ClientMessage::Unknown(kind) => kind,
        }
    }

    /// Create a new Auth message.
    #[must_use]
    pub fn auth(token: impl Into<String>) -> Self {
        ClientMessage::Auth {
            token: token.into(),
        }
    }

    /// Create a new JoinRoom message.
    #[must_use]
    pub fn join_room(room: impl Into<String>) -> Self {
        ClientMessage::JoinRoom { room: room.into() }
    }

    /// Create a new LeaveRoom message.
    #[must_use]
    pub fn leave_room(room: impl Into<String>) -> Self {
        ClientMessage::LeaveRoom { room: room.into() }
    }

    pub(crate) fn from_envelope(envelope: RawEnvelope) -> Result<Self, ProtocolError> {
        let RawEnvelope { kind, payload } = envelope;
        let payload = match payload {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        let message = match kind.as_str() {
            kinds::AUTH => {
                let p: AuthPayload = parse_payload(&kind, payload)?;
                ClientMessage::Auth { token: p.token }
            }
            kinds::JOIN_ROOM => {
                let p: RoomPayload = parse_payload(&kind, payload)?;
                ClientMessage::JoinRoom { room: p.room }
            }
            kinds::LEAVE_ROOM => {
                let p: RoomPayload = parse_payload(&kind, payload)?;
                ClientMessage::LeaveRoom { room: p.room }
            }
            kinds::PING => ClientMessage::Ping,
            _ => ClientMessage::Unknown(kind),
        };

        Ok(message)
    }

    pub(crate) fn to_envelope(&self) -> RawEnvelope {
        let payload = match self {
            ClientMessage::Auth { token } => serde_json::json!({ "token": token }),
            ClientMessage::JoinRoom { room } | ClientMessage::LeaveRoom { room } => {
                serde_json::json!({ "room": room })
            }
            ClientMessage::Ping | ClientMessage::Unknown(_) => serde_json::json!({}),
        };
        RawEnvelope {
            kind: self.kind().to_string(),
            payload,
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    kind: &str,
    payload: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}
