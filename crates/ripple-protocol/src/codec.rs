//! Codec for encoding and decoding Ripple envelopes.
//!
//! Text frames are JSON, binary frames are MessagePack. Both carry the same
//! `{type, payload}` envelope.

use bytes::Bytes;
use thiserror::Error;

use crate::event::Event;
use crate::message::{ClientMessage, RawEnvelope};

/// Maximum frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Payload does not match the declared type.
    #[error("Invalid payload for '{kind}': {source}")]
    InvalidPayload {
        /// Declared envelope type.
        kind: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Frame encoding used by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// JSON in text frames.
    #[default]
    Text,
    /// MessagePack in binary frames.
    Binary,
}

impl Format {
    /// Encode an outbound event.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, event: &Event) -> Result<Bytes, ProtocolError> {
        match self {
            Format::Text => Ok(Bytes::from(encode_text(event)?)),
            Format::Binary => encode_binary(event),
        }
    }

    /// Decode an inbound client message.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or malformed.
    pub fn decode(&self, data: &[u8]) -> Result<ClientMessage, ProtocolError> {
        match self {
            Format::Text => {
                check_size(data.len())?;
                let envelope: RawEnvelope = serde_json::from_slice(data)?;
                ClientMessage::from_envelope(envelope)
            }
            Format::Binary => decode_binary(data),
        }
    }
}

fn check_size(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(())
}

/// Decode a client message from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or malformed.
pub fn decode_text(text: &str) -> Result<ClientMessage, ProtocolError> {
    check_size(text.len())?;
    let envelope: RawEnvelope = serde_json::from_str(text)?;
    ClientMessage::from_envelope(envelope)
}

/// Decode a client message from a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or malformed.
pub fn decode_binary(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    check_size(data.len())?;
    let envelope: RawEnvelope = rmp_serde::from_slice(data)?;
    ClientMessage::from_envelope(envelope)
}

/// Encode an event as a JSON text frame.
///
/// # Errors
///
/// Returns an error if the encoded frame is too large.
pub fn encode_text(event: &Event) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;
    check_size(text.len())?;
    Ok(text)
}

/// Encode an event as a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if encoding fails or the frame is too large.
pub fn encode_binary(event: &Event) -> Result<Bytes, ProtocolError> {
    let data = rmp_serde::to_vec_named(event)?;
    check_size(data.len())?;
    Ok(Bytes::from(data))
}

/// Encode a client message, as a client would send it.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_message(message: &ClientMessage, format: Format) -> Result<Bytes, ProtocolError> {
    let envelope = message.to_envelope();
    match format {
        Format::Text => Ok(Bytes::from(serde_json::to_vec(&envelope)?)),
        Format::Binary => Ok(Bytes::from(rmp_serde::to_vec_named(&envelope)?)),
    }
}

/// Decode an outbound event, as a client would receive it.
///
/// # Errors
///
/// Returns an error if the frame is malformed.
pub fn decode_event(data: &[u8], format: Format) -> Result<Event, ProtocolError> {
    match format {
        Format::Text => Ok(serde_json::from_slice(data)?),
        Format::Binary => Ok(rmp_serde::from_slice(data)?),
    }
}
