//! In-memory chat and like store.
//!
//! Used when no external store is configured, and by tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use reelroom_protocol::ChatMessage;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::registry::RoomId;
use crate::store::{ChatStore, LikeStore, LikeToggle, NewMessage};

#[derive(Debug, Default)]
struct RoomLikes {
    users: HashSet<String>,
    total: i64,
}

#[derive(Debug, Default)]
struct State {
    chats: HashMap<RoomId, Vec<NewMessage>>,
    likes: HashMap<RoomId, RoomLikes>,
}

/// Process-local implementation of [`ChatStore`] and [`LikeStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn load_history(&self, room_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.state.lock().await;
        let Some(messages) = state.chats.get(room_id) else {
            return Ok(Vec::new());
        };

        let total_count = messages.len() as u64;
        Ok(messages
            .iter()
            .map(|m| ChatMessage {
                username: m.username.clone(),
                text: m.text.clone(),
                room_id: room_id.to_string(),
                total_count,
                send_time: m.send_time.clone(),
            })
            .collect())
    }

    async fn append_message(&self, room_id: &str, message: NewMessage) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .chats
            .entry(room_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn count_messages(&self, room_id: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.chats.get(room_id).map_or(0, |m| m.len() as u64))
    }
}

#[async_trait]
impl LikeStore for MemoryStore {
    async fn aggregate_likes(&self, room_id: &str) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.likes.get(room_id).map_or(0, |likes| likes.total))
    }

    async fn user_liked(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError> {
        if user_id.is_empty() {
            return Ok(false);
        }
        let state = self.state.lock().await;
        Ok(state
            .likes
            .get(room_id)
            .is_some_and(|likes| likes.users.contains(user_id)))
    }

    async fn toggle_like(&self, user_id: &str, room_id: &str) -> Result<LikeToggle, StoreError> {
        if user_id.is_empty() {
            return Err(StoreError::NotFound("empty user id".to_string()));
        }

        let mut state = self.state.lock().await;
        let likes = state.likes.entry(room_id.to_string()).or_default();
        let user_liked = if likes.users.remove(user_id) {
            likes.total -= 1;
            false
        } else {
            likes.users.insert(user_id.to_string());
            likes.total += 1;
            true
        };

        Ok(LikeToggle {
            total_likes: likes.total,
            user_liked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> NewMessage {
        NewMessage {
            username: "A".to_string(),
            text: text.to_string(),
            send_time: "2024-05-01T10:00:00.000Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_history_is_oldest_first() {
        let store = MemoryStore::new();
        store.append_message("r1", message("one")).await.unwrap();
        store.append_message("r1", message("two")).await.unwrap();
        store.append_message("r2", message("other")).await.unwrap();

        let history = store.load_history("r1").await.unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(history.iter().all(|m| m.total_count == 2 && m.room_id == "r1"));

        assert_eq!(store.count_messages("r1").await.unwrap(), 2);
        assert_eq!(store.count_messages("unknown").await.unwrap(), 0);
        assert!(store.load_history("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_double_toggle_restores_state() {
        let store = MemoryStore::new();
        assert_eq!(store.aggregate_likes("r1").await.unwrap(), 0);

        let first = store.toggle_like("B", "r1").await.unwrap();
        assert_eq!(first, LikeToggle { total_likes: 1, user_liked: true });
        assert!(store.user_liked("B", "r1").await.unwrap());

        let second = store.toggle_like("B", "r1").await.unwrap();
        assert_eq!(second, LikeToggle { total_likes: 0, user_liked: false });
        assert!(!store.user_liked("B", "r1").await.unwrap());
        assert_eq!(store.aggregate_likes("r1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_users_count_once() {
        let store = MemoryStore::new();
        store.toggle_like("A", "r1").await.unwrap();
        let toggle = store.toggle_like("B", "r1").await.unwrap();
        assert_eq!(toggle.total_likes, 2);
        assert_eq!(store.aggregate_likes("r2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_user_is_never_liked() {
        let store = MemoryStore::new();
        assert!(!store.user_liked("", "r1").await.unwrap());
        assert!(store.toggle_like("", "r1").await.is_err());
    }
}
