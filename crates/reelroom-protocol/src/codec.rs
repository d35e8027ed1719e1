//! JSON codec for room events.
//!
//! One websocket frame carries exactly one event, so no length prefix is
//! needed: the frame boundary is the event boundary.

use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Default maximum encoded event size (64 KiB).
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Event size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error, including unknown `event_type` values.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Binary frame that is not UTF-8 text.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a server event as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::Encode)
}

/// Decode a client event from a JSON text frame of at most
/// [`MAX_EVENT_SIZE`] bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a known event.
pub fn decode(text: &str) -> Result<ClientEvent, ProtocolError> {
    decode_with_limit(text, MAX_EVENT_SIZE)
}

/// Decode a client event from a JSON text frame of at most `max_size` bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a known event.
pub fn decode_with_limit(text: &str, max_size: usize) -> Result<ClientEvent, ProtocolError> {
    if text.len() > max_size {
        return Err(ProtocolError::TooLarge {
            size: text.len(),
            max: max_size,
        });
    }
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Decode a client event from a binary frame holding UTF-8 JSON.
///
/// # Errors
///
/// Returns an error if the bytes are not UTF-8 or not a known event.
pub fn decode_bytes(data: &[u8]) -> Result<ClientEvent, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|e| ProtocolError::Invalid(e.to_string()))?;
    decode(text)
}

/// Encode a client event. Used by clients and test harnesses.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_client(event: &ClientEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::Encode)
}

/// Decode a server event. Used by clients and test harnesses.
///
/// # Errors
///
/// Returns an error if the frame is not a known server event.
pub fn decode_server(text: &str) -> Result<ServerEvent, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}
