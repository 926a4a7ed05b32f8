//! # ripple-protocol
//!
//! Wire envelopes for the Ripple coordination layer.
//!
//! Every frame exchanged with a client is a `{type, payload}` envelope.
//! Text frames carry JSON, binary frames carry the same envelope encoded as
//! MessagePack.
//!
//! ## Inbound types
//!
//! - `auth {token}` - Associate the connection with a user
//! - `join_room {room}` / `leave_room {room}` - Room membership
//! - `ping {}` - Client keepalive
//!
//! ## Outbound types
//!
//! - `connected {connectionId}`, `authenticated {userId}`
//! - `joined_room {room}`, `left_room {room}`, `pong {}`
//! - `error {code, message}`
//! - Any business event supplied by the host application
//!
//! ## Example
//!
//! ```rust
//! use ripple_protocol::{codec, ClientMessage, Event};
//!
//! let msg = codec::decode_text(r#"{"type":"join_room","payload":{"room":"venue:42"}}"#).unwrap();
//! assert_eq!(msg, ClientMessage::JoinRoom { room: "venue:42".into() });
//!
//! let out = codec::encode_text(&Event::joined_room("venue:42")).unwrap();
//! assert!(out.contains("joined_room"));
//! ```

pub mod codec;
pub mod event;
pub mod message;

pub use codec::{
    decode_binary, decode_event, decode_text, encode_binary, encode_message, encode_text, Format,
    ProtocolError,
};
pub use event::{error_codes, Event};
pub use message::ClientMessage;
