//! Rooms: named broadcast domains.
//!
//! A room pairs a membership set with an unbounded FIFO event queue. The
//! queue is drained by the room's single dispatcher task, see
//! [`crate::dispatcher`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use reelroom_protocol::ServerEvent;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::connection::{Connection, ConnectionId};
use crate::error::HubError;
use crate::registry::RoomId;

/// Result of delivering one event to a room's members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FanOut {
    /// Members the event was queued for.
    pub delivered: usize,
    /// Members removed because delivery failed.
    pub dropped: usize,
}

#[derive(Debug)]
struct Members {
    conns: HashMap<ConnectionId, Connection>,
    /// When the set last became empty. `None` while occupied.
    emptied_at: Option<Instant>,
    /// Set once the room is removed from the registry. A retired room
    /// accepts no members.
    retired: bool,
}

impl Members {
    fn mark_if_empty(&mut self) {
        if self.conns.is_empty() && self.emptied_at.is_none() {
            self.emptied_at = Some(Instant::now());
        }
    }
}

/// Membership state shared between a [`Room`] and its dispatcher.
#[derive(Debug)]
pub(crate) struct RoomState {
    id: RoomId,
    members: RwLock<Members>,
    dropped_total: Arc<AtomicU64>,
}

impl RoomState {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Queue `event` for every member. Members that cannot take it are
    /// closed and removed.
    pub(crate) fn fan_out(&self, event: &Arc<ServerEvent>) -> FanOut {
        let members = self.members.upgradable_read();

        let mut failed = Vec::new();
        let mut delivered = 0;
        for (id, conn) in &members.conns {
            match conn.send(Arc::clone(event)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(room = %self.id, connection = %id, error = %e, "Dropping member");
                    failed.push(*id);
                }
            }
        }

        if failed.is_empty() {
            return FanOut {
                delivered,
                dropped: 0,
            };
        }

        let mut members = RwLockUpgradableReadGuard::upgrade(members);
        for id in &failed {
            if let Some(conn) = members.conns.remove(id) {
                conn.close();
            }
        }
        members.mark_if_empty();
        self.dropped_total
            .fetch_add(failed.len() as u64, Ordering::Relaxed);

        FanOut {
            delivered,
            dropped: failed.len(),
        }
    }
}

/// A room registered in the hub.
#[derive(Debug)]
pub struct Room {
    state: Arc<RoomState>,
    queue: mpsc::UnboundedSender<Arc<ServerEvent>>,
}

impl Room {
    /// Create an empty room. The receiver must be handed to a dispatcher.
    pub(crate) fn new(
        id: impl Into<RoomId>,
        dropped_total: Arc<AtomicU64>,
    ) -> (Self, mpsc::UnboundedReceiver<Arc<ServerEvent>>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RoomState {
            id: id.into(),
            members: RwLock::new(Members {
                conns: HashMap::new(),
                emptied_at: Some(Instant::now()),
                retired: false,
            }),
            dropped_total,
        });
        (Self { state, queue }, rx)
    }

    pub(crate) fn state(&self) -> &Arc<RoomState> {
        &self.state
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.state.members.read().conns.len()
    }

    #[must_use]
    pub fn is_member(&self, id: ConnectionId) -> bool {
        self.state.members.read().conns.contains_key(&id)
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.state.members.read().retired
    }

    /// Add a member. A retired room hands the connection back.
    pub(crate) fn add_member(&self, connection: Connection) -> Result<(), Connection> {
        let mut members = self.state.members.write();
        if members.retired {
            return Err(connection);
        }
        members.conns.insert(connection.id(), connection);
        members.emptied_at = None;
        Ok(())
    }

    /// Remove a member, returning it if it was present.
    pub(crate) fn remove_member(&self, id: ConnectionId) -> Option<Connection> {
        let mut members = self.state.members.write();
        let removed = members.conns.remove(&id);
        members.mark_if_empty();
        removed
    }

    /// Put an event on the room's queue.
    ///
    /// This is the only way to broadcast: the dispatcher is the queue's
    /// single consumer, which keeps delivery in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::QueueClosed`] if the dispatcher is gone.
    pub fn enqueue(&self, event: impl Into<Arc<ServerEvent>>) -> Result<(), HubError> {
        self.queue
            .send(event.into())
            .map_err(|_| HubError::QueueClosed(self.state.id.clone()))
    }

    /// Retire the room if it has been empty for at least `grace`.
    ///
    /// Returns `true` if the room is now retired.
    pub(crate) fn try_retire(&self, grace: Duration) -> bool {
        let mut members = self.state.members.write();
        if members.retired {
            return true;
        }
        let idle = members.conns.is_empty()
            && members
                .emptied_at
                .is_some_and(|since| since.elapsed() >= grace);
        if idle {
            members.retired = true;
        }
        idle
    }

    /// Retire the room and close every member. Returns how many were closed.
    pub(crate) fn close_all(&self) -> usize {
        let mut members = self.state.members.write();
        members.retired = true;
        let closed = members.conns.len();
        for (_, conn) in members.conns.drain() {
            conn.close();
        }
        members.mark_if_empty();
        closed
    }
}
