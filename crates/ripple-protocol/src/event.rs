//! Outbound events.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Outbound type identifiers defined by the broker.
pub mod kinds {
    pub const CONNECTED: &str = "connected";
    pub const AUTHENTICATED: &str = "authenticated";
    pub const JOINED_ROOM: &str = "joined_room";
    pub const LEFT_ROOM: &str = "left_room";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

/// Error codes carried by `error` events.
pub mod error_codes {
    /// Frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 4000;
    /// Token rejected by the authenticator.
    pub const AUTH_FAILED: u16 = 4001;
    /// Room name rejected.
    pub const INVALID_ROOM: u16 = 4002;
    /// A capacity limit was reached.
    pub const CAPACITY: u16 = 4003;
    /// The connection is no longer registered.
    pub const NOT_CONNECTED: u16 = 4004;
    /// Rate limit exceeded.
    pub const RATE_LIMITED: u16 = 4029;
}

/// An event delivered to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload.
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Create a business event.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Sent once when a connection is registered.
    #[must_use]
    pub fn connected(connection_id: &str) -> Self {
        Self::new(kinds::CONNECTED, json!({ "connectionId": connection_id }))
    }

    /// Sent after a successful `auth`.
    #[must_use]
    pub fn authenticated(user_id: &str) -> Self {
        Self::new(kinds::AUTHENTICATED, json!({ "userId": user_id }))
    }

    /// Sent after a successful `join_room`.
    #[must_use]
    pub fn joined_room(room: &str) -> Self {
        Self::new(kinds::JOINED_ROOM, json!({ "room": room }))
    }

    /// Sent after `leave_room`.
    #[must_use]
    pub fn left_room(room: &str) -> Self {
        Self::new(kinds::LEFT_ROOM, json!({ "room": room }))
    }

    /// Reply to a client `ping`.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(kinds::PONG, json!({}))
    }

    /// A non-fatal error. The connection stays open.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::new(
            kinds::ERROR,
            json!({ "code": code, "message": message.into() }),
        )
    }

    /// Check if this event has the given type.
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_shape() {
        let event = Event::connected("conn_1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "connected", "payload": {"connectionId": "conn_1"}})
        );
    }

    #[test]
    fn test_error_event() {
        let event = Event::error(error_codes::AUTH_FAILED, "Invalid token");
        assert!(event.is(kinds::ERROR));
        assert_eq!(event.payload["code"], 4001);
        assert_eq!(event.payload["message"], "Invalid token");
    }

    #[test]
    fn test_business_event() {
        let event = Event::new("notification", json!({"text": "hi"}));
        assert_eq!(event.kind, "notification");
        assert_eq!(event.payload["text"], "hi");
    }
}
