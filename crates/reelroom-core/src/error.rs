//! Error types shared across the hub.

use reelroom_protocol::ProtocolError;
use thiserror::Error;

use crate::registry::RoomId;

/// Failure on a connection's underlying stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the stream.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The peer sent a frame that is not a valid event.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Why an event could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection was closed or its writer is gone.
    #[error("connection closed")]
    Closed,

    /// The connection's outbound queue is full.
    #[error("outbound queue full")]
    Full,
}

/// Failure reported by a chat or like store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The requested document does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store could not be reached or rejected the operation.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Hub-level errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The room's event queue no longer accepts events.
    #[error("Event queue closed for room: {0}")]
    QueueClosed(RoomId),
}
