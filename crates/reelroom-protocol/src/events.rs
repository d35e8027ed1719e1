//! Event types exchanged over a room connection.
//!
//! Every frame is a JSON object discriminated by its `event_type` field.
//! Inbound and outbound events are closed enums so both ends of the codec
//! match exhaustively.

use serde::{Deserialize, Serialize};

/// Username stamped on messages synthesized by the server.
pub const SYSTEM_USERNAME: &str = "system";

/// Error codes carried by [`ServerEvent::Error`].
pub mod error_codes {
    /// The chat message could not be persisted and was not broadcast.
    pub const CHAT_NOT_PERSISTED: u16 = 2001;
    /// The like toggle failed in the store.
    pub const LIKE_FAILED: u16 = 2002;
    /// A like was requested without any user id to attribute it to.
    pub const MISSING_USER_ID: u16 = 2003;
}

/// Chat payload as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInput {
    /// Display name chosen by the sender.
    #[serde(default)]
    pub username: String,
    /// Message body.
    #[serde(default)]
    pub text: String,
}

impl ChatInput {
    /// Create a chat payload.
    #[must_use]
    pub fn new(username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            text: text.into(),
        }
    }
}

/// A chat message as seen by room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub username: String,
    pub text: String,
    pub room_id: String,
    /// Persisted message count of the room after the write that produced
    /// this message.
    pub total_count: u64,
    /// RFC 3339 timestamp assigned by the server when the message was stored.
    pub send_time: String,
}

impl ChatMessage {
    /// Create a message announced by the server itself.
    ///
    /// System messages are never persisted, so they carry a zero count.
    #[must_use]
    pub fn system(
        room_id: impl Into<String>,
        text: impl Into<String>,
        send_time: impl Into<String>,
    ) -> Self {
        Self {
            username: SYSTEM_USERNAME.to_string(),
            text: text.into(),
            room_id: room_id.into(),
            total_count: 0,
            send_time: send_time.into(),
        }
    }

    /// Whether this message was synthesized by the server.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.username == SYSTEM_USERNAME
    }
}

/// Like counter state for a room, from the point of view of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeUpdate {
    /// Aggregate like count of the room's video.
    pub total_like: i64,
    /// Whether `user_id` currently likes it.
    pub user_like: bool,
    pub user_id: String,
}

impl LikeUpdate {
    #[must_use]
    pub fn new(total_like: i64, user_like: bool, user_id: impl Into<String>) -> Self {
        Self {
            total_like,
            user_like,
            user_id: user_id.into(),
        }
    }
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Post a chat message to the room.
    Message { message: ChatInput },

    /// Toggle the like state of `user_id` for the room's video.
    Like {
        /// Falls back to the connection's user id when empty.
        #[serde(default)]
        user_id: String,
    },
}

impl ClientEvent {
    /// Create a chat message event.
    #[must_use]
    pub fn message(username: impl Into<String>, text: impl Into<String>) -> Self {
        ClientEvent::Message {
            message: ChatInput::new(username, text),
        }
    }

    /// Create a like toggle event.
    #[must_use]
    pub fn like(user_id: impl Into<String>) -> Self {
        ClientEvent::Like {
            user_id: user_id.into(),
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Message { .. } => "message",
            ClientEvent::Like { .. } => "like",
        }
    }
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Chat history snapshot, sent only to a newly joined connection.
    FirstMessage { first_message: Vec<ChatMessage> },

    /// Like snapshot, sent only to a newly joined connection.
    FirstLike(LikeUpdate),

    /// A chat message broadcast to the whole room.
    Message { message: ChatMessage },

    /// A like toggle broadcast to the whole room.
    TotalLike(LikeUpdate),

    /// A request from this connection could not be honoured.
    Error { code: u16, message: String },
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::FirstMessage { .. } => "first_message",
            ServerEvent::FirstLike(_) => "first_like",
            ServerEvent::Message { .. } => "message",
            ServerEvent::TotalLike(_) => "total_like",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Create a broadcast chat message event.
    #[must_use]
    pub fn message(message: ChatMessage) -> Self {
        ServerEvent::Message { message }
    }

    /// Create a history snapshot event.
    #[must_use]
    pub fn first_message(history: Vec<ChatMessage>) -> Self {
        ServerEvent::FirstMessage {
            first_message: history,
        }
    }

    /// Create an error event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }

    /// The chat message carried by a `message` event.
    #[must_use]
    pub fn chat_message(&self) -> Option<&ChatMessage> {
        match self {
            ServerEvent::Message { message } => Some(message),
            _ => None,
        }
    }

    /// The like state carried by `first_like` and `total_like` events.
    #[must_use]
    pub fn like_update(&self) -> Option<&LikeUpdate> {
        match self {
            ServerEvent::FirstLike(update) | ServerEvent::TotalLike(update) => Some(update),
            _ => None,
        }
    }

    /// The code of an `error` event.
    #[must_use]
    pub fn error_code(&self) -> Option<u16> {
        match self {
            ServerEvent::Error { code, .. } => Some(*code),
            _ => None,
        }
    }
}
