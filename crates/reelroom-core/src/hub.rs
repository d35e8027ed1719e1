//! The hub facade: joins, leaves and the shared handles event routers use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reelroom_protocol::{codec, ChatMessage, LikeUpdate, ServerEvent};
use tracing::{debug, info, warn};

use crate::connection::{Connection, Outbound};
use crate::error::{HubError, StoreError};
use crate::memory::MemoryStore;
use crate::registry::RoomRegistry;
use crate::router::EventRouter;
use crate::store::{ChatStore, LikeStore};
use crate::time::{to_rfc3339, Clock, MonotonicClock, SystemClock};

/// Hub behaviour settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Largest inbound frame the router will decode.
    pub max_event_size: usize,
    /// Text of the system message broadcast when a connection joins.
    pub join_announcement: String,
    /// Text broadcast when a connection leaves. `None` disables it.
    pub leave_announcement: Option<String>,
    /// Only broadcast chat messages the store confirmed.
    pub require_persisted_chat: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            max_event_size: codec::MAX_EVENT_SIZE,
            join_announcement: "A new user has joined the room.".to_string(),
            leave_announcement: Some("A user has left the room.".to_string()),
            require_persisted_chat: false,
        }
    }
}

/// Everything a transport needs to serve one joined connection.
#[derive(Debug)]
pub struct Session {
    pub connection: Connection,
    /// Events to write to the client.
    pub outbound: Outbound,
    /// Read side. Feed it the client's frames.
    pub router: EventRouter,
}

struct HubInner {
    registry: Arc<RoomRegistry>,
    chat: Arc<dyn ChatStore>,
    likes: Arc<dyn LikeStore>,
    clock: Arc<dyn Clock>,
    config: HubConfig,
    store_errors: AtomicU64,
}

/// Entry point for connections joining and leaving rooms.
///
/// Cloning is cheap; clones share the same registry and stores.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("rooms", &self.inner.registry.room_count())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a hub stamping messages with the system clock.
    #[must_use]
    pub fn new(
        registry: Arc<RoomRegistry>,
        chat: Arc<dyn ChatStore>,
        likes: Arc<dyn LikeStore>,
        config: HubConfig,
    ) -> Self {
        Self::with_clock(
            registry,
            chat,
            likes,
            Arc::new(MonotonicClock::new(SystemClock)),
            config,
        )
    }

    #[must_use]
    pub fn with_clock(
        registry: Arc<RoomRegistry>,
        chat: Arc<dyn ChatStore>,
        likes: Arc<dyn LikeStore>,
        clock: Arc<dyn Clock>,
        config: HubConfig,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry,
                chat,
                likes,
                clock,
                config,
                store_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Create a hub backed by a fresh [`MemoryStore`].
    #[must_use]
    pub fn in_memory(config: HubConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(
            Arc::new(RoomRegistry::new()),
            Arc::clone(&store) as Arc<dyn ChatStore>,
            store,
            config,
        )
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Store failures observed since startup.
    #[must_use]
    pub fn store_errors(&self) -> u64 {
        self.inner.store_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn chat(&self) -> &dyn ChatStore {
        self.inner.chat.as_ref()
    }

    pub(crate) fn likes(&self) -> &dyn LikeStore {
        self.inner.likes.as_ref()
    }

    pub(crate) fn send_time(&self) -> String {
        to_rfc3339(self.inner.clock.now_millis())
    }

    pub(crate) fn record_store_error(&self, operation: &str, room_id: &str, error: &StoreError) {
        self.inner.store_errors.fetch_add(1, Ordering::Relaxed);
        warn!(room = %room_id, operation, error = %error, "Store operation failed");
    }

    /// Join `room_id` as `user_id`.
    ///
    /// The room is created on first use. Members are told about the arrival,
    /// and the new connection receives the room's history and like state.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::QueueClosed`] if the arrival cannot be announced;
    /// the connection is removed again in that case.
    pub async fn join(
        &self,
        room_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Session, HubError> {
        let (connection, outbound) =
            Connection::new(room_id, user_id, self.inner.config.outbound_buffer);
        let room = self.inner.registry.join(connection.clone());

        info!(
            room = %room.id(),
            connection = %connection.id(),
            user = %connection.user_id(),
            "Connection joined"
        );

        let announcement = ChatMessage::system(
            room.id(),
            self.inner.config.join_announcement.as_str(),
            self.send_time(),
        );
        if let Err(e) = room.enqueue(ServerEvent::message(announcement)) {
            room.remove_member(connection.id());
            connection.close();
            return Err(e);
        }

        self.send_history(&connection).await;
        self.send_like_snapshot(&connection).await;

        let router = EventRouter::new(self.clone(), connection.clone(), room);
        Ok(Session {
            connection,
            outbound,
            router,
        })
    }

    async fn send_history(&self, connection: &Connection) {
        let history = match self.chat().load_history(connection.room_id()).await {
            Ok(history) => history,
            Err(e) => {
                self.record_store_error("load_history", connection.room_id(), &e);
                return;
            }
        };

        if let Err(e) = connection.send(Arc::new(ServerEvent::first_message(history))) {
            debug!(connection = %connection.id(), error = %e, "History not delivered");
        }
    }

    async fn send_like_snapshot(&self, connection: &Connection) {
        let room_id = connection.room_id();
        let user_id = connection.user_id();

        let total_like = match self.likes().aggregate_likes(room_id).await {
            Ok(total) => total,
            Err(e) => {
                self.record_store_error("aggregate_likes", room_id, &e);
                return;
            }
        };

        let user_like = if user_id.is_empty() {
            false
        } else {
            match self.likes().user_liked(user_id, room_id).await {
                Ok(liked) => liked,
                Err(e) => {
                    self.record_store_error("user_liked", room_id, &e);
                    false
                }
            }
        };

        let snapshot = ServerEvent::FirstLike(LikeUpdate::new(total_like, user_like, user_id));
        if let Err(e) = connection.send(Arc::new(snapshot)) {
            debug!(connection = %connection.id(), error = %e, "Like snapshot not delivered");
        }
    }

    /// Remove a connection from its room and close it.
    ///
    /// The remaining members are told about the departure once, even when
    /// the dispatcher already dropped the connection after a failed write.
    /// Safe to call more than once. Returns `true` if the connection was
    /// still a member.
    pub fn leave(&self, connection: &Connection) -> bool {
        let removed = self
            .inner
            .registry
            .leave(connection.room_id(), connection.id())
            .is_some();
        connection.close();

        if !connection.mark_departed() {
            return removed;
        }

        info!(
            room = %connection.room_id(),
            connection = %connection.id(),
            removed,
            "Connection left"
        );

        if let Some(text) = &self.inner.config.leave_announcement {
            if let Some(room) = self.inner.registry.get(connection.room_id()) {
                let announcement =
                    ChatMessage::system(room.id(), text.as_str(), self.send_time());
                if let Err(e) = room.enqueue(ServerEvent::message(announcement)) {
                    debug!(room = %room.id(), error = %e, "Leave announcement dropped");
                }
            }
        }
        removed
    }
}
