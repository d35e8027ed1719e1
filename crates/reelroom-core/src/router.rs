//! Per-connection event router.
//!
//! The router is the read side of a connection. It decodes each inbound
//! frame, performs the store side effect the event asks for and puts the
//! resulting broadcast on the room's queue.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use reelroom_protocol::{
    codec, error_codes, ChatInput, ChatMessage, ClientEvent, LikeUpdate, ServerEvent,
};
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::error::TransportError;
use crate::hub::Hub;
use crate::room::Room;
use crate::store::NewMessage;

/// What happened to a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A broadcast was queued for the room.
    Broadcast,
    /// The request was refused and the sender got an error event.
    Rejected(u16),
    /// The room queue was closed; nothing was sent.
    Dropped,
}

/// Routes one connection's inbound events.
#[derive(Debug)]
pub struct EventRouter {
    hub: Hub,
    connection: Connection,
    room: Arc<Room>,
}

impl EventRouter {
    pub(crate) fn new(hub: Hub, connection: Connection, room: Arc<Room>) -> Self {
        Self {
            hub,
            connection,
            room,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Consume inbound frames until the stream ends or fails, then leave the
    /// room.
    ///
    /// A frame that does not decode ends the loop like a transport error.
    pub async fn run<S>(self, mut inbound: S)
    where
        S: Stream<Item = Result<String, TransportError>> + Unpin,
    {
        let max_size = self.hub.config().max_event_size;
        while let Some(frame) = inbound.next().await {
            let decoded = frame.and_then(|text| {
                codec::decode_with_limit(&text, max_size).map_err(TransportError::from)
            });
            let event = match decoded {
                Ok(event) => event,
                Err(e) => {
                    debug!(connection = %self.connection.id(), error = %e, "Read loop ending");
                    break;
                }
            };

            let kind = event.name();
            let outcome = self.route(event).await;
            trace!(connection = %self.connection.id(), event = kind, ?outcome, "Event routed");
        }

        self.hub.leave(&self.connection);
    }

    /// Handle one decoded event.
    pub async fn route(&self, event: ClientEvent) -> RouteOutcome {
        match event {
            ClientEvent::Message { message } => self.handle_message(message).await,
            ClientEvent::Like { user_id } => self.handle_like(user_id).await,
        }
    }

    async fn handle_message(&self, input: ChatInput) -> RouteOutcome {
        let room_id = self.room.id();
        let send_time = self.hub.send_time();

        let record = NewMessage {
            username: input.username.clone(),
            text: input.text.clone(),
            send_time: send_time.clone(),
        };
        if let Err(e) = self.hub.chat().append_message(room_id, record).await {
            self.hub.record_store_error("append_message", room_id, &e);
            if self.hub.config().require_persisted_chat {
                return self.reject(error_codes::CHAT_NOT_PERSISTED, "message could not be saved");
            }
        }

        let total_count = match self.hub.chat().count_messages(room_id).await {
            Ok(count) => count,
            Err(e) => {
                self.hub.record_store_error("count_messages", room_id, &e);
                0
            }
        };

        self.broadcast(ServerEvent::message(ChatMessage {
            username: input.username,
            text: input.text,
            room_id: room_id.to_string(),
            total_count,
            send_time,
        }))
    }

    async fn handle_like(&self, user_id: String) -> RouteOutcome {
        let room_id = self.room.id();
        let user_id = if user_id.is_empty() {
            self.connection.user_id().to_string()
        } else {
            user_id
        };

        if user_id.is_empty() {
            warn!(room = %room_id, connection = %self.connection.id(), "Like without user id");
            return self.reject(error_codes::MISSING_USER_ID, "like requires a user id");
        }

        match self.hub.likes().toggle_like(&user_id, room_id).await {
            Ok(toggle) => self.broadcast(ServerEvent::TotalLike(LikeUpdate::new(
                toggle.total_likes,
                toggle.user_liked,
                user_id,
            ))),
            Err(e) => {
                self.hub.record_store_error("toggle_like", room_id, &e);
                self.reject(error_codes::LIKE_FAILED, "like could not be updated")
            }
        }
    }

    fn broadcast(&self, event: ServerEvent) -> RouteOutcome {
        match self.room.enqueue(event) {
            Ok(()) => RouteOutcome::Broadcast,
            Err(e) => {
                warn!(connection = %self.connection.id(), error = %e, "Broadcast dropped");
                RouteOutcome::Dropped
            }
        }
    }

    fn reject(&self, code: u16, message: &str) -> RouteOutcome {
        if let Err(e) = self.connection.send(Arc::new(ServerEvent::error(code, message))) {
            debug!(connection = %self.connection.id(), error = %e, "Error event not delivered");
        }
        RouteOutcome::Rejected(code)
    }
}
