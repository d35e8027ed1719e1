//! Persistence seams for chat history and like counts.
//!
//! The hub never talks to a database directly. It goes through these
//! traits so a deployment can plug in its document store, and tests can
//! inject failures.

use async_trait::async_trait;
use reelroom_protocol::ChatMessage;

use crate::error::StoreError;

/// A chat message about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub username: String,
    pub text: String,
    /// RFC 3339 timestamp assigned by the hub.
    pub send_time: String,
}

/// Outcome of a like toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeToggle {
    /// Aggregate like count after the toggle.
    pub total_likes: i64,
    /// Whether the user likes the video after the toggle.
    pub user_liked: bool,
}

/// Chat history storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Stored messages of a room, oldest first.
    ///
    /// Every returned message carries the room's current message count as
    /// its `total_count`.
    async fn load_history(&self, room_id: &str) -> Result<Vec<ChatMessage>, StoreError>;

    async fn append_message(&self, room_id: &str, message: NewMessage) -> Result<(), StoreError>;

    async fn count_messages(&self, room_id: &str) -> Result<u64, StoreError>;
}

/// Like storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LikeStore: Send + Sync {
    /// Aggregate like count of a room's video. Unknown rooms have zero.
    async fn aggregate_likes(&self, room_id: &str) -> Result<i64, StoreError>;

    async fn user_liked(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError>;

    /// Flip the user's like and adjust the aggregate in one atomic step.
    ///
    /// A user contributes at most one like, so toggling twice restores both
    /// the aggregate and the user's state.
    async fn toggle_like(&self, user_id: &str, room_id: &str) -> Result<LikeToggle, StoreError>;
}
