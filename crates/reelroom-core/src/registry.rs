//! Room registry.
//!
//! Maps room identifiers to live [`Room`]s using a sharded concurrent map.
//! Rooms are created lazily on first use, each with its own dispatcher, and
//! evicted by a periodic sweep once they have been empty for a grace period.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionId};
use crate::dispatcher;
use crate::room::Room;

/// A room identifier. Any string is valid, including the empty one.
pub type RoomId = String;

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Rooms currently registered.
    pub room_count: usize,
    /// Connections across all rooms.
    pub connection_count: usize,
    /// Dispatchers spawned since the registry was created.
    pub dispatchers_started: usize,
    /// Members dropped after a failed delivery.
    pub dropped_members: u64,
}

/// Owner of every live room.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    dispatchers_started: AtomicUsize,
    dropped_members: Arc<AtomicU64>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the room for `room_id`, creating it and its dispatcher if needed.
    ///
    /// Concurrent calls for the same unseen id produce exactly one room.
    pub fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.get(room_id) {
            return Arc::clone(room.value());
        }

        let entry = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            let (room, rx) = Room::new(room_id, Arc::clone(&self.dropped_members));
            dispatcher::spawn(Arc::clone(room.state()), rx);
            self.dispatchers_started.fetch_add(1, Ordering::Relaxed);
            debug!(room = %room_id, "Room created");
            Arc::new(room)
        });
        Arc::clone(entry.value())
    }

    /// Look up a room without creating it.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|room| Arc::clone(room.value()))
    }

    /// Add `connection` to the room it is bound to.
    ///
    /// If the room is evicted between lookup and insertion, the join is
    /// retried against a fresh room.
    pub fn join(&self, connection: Connection) -> Arc<Room> {
        let mut connection = connection;
        loop {
            let room = self.get_or_create(connection.room_id());
            match room.add_member(connection) {
                Ok(()) => return room,
                Err(rejected) => {
                    debug!(room = %room.id(), connection = %rejected.id(), "Room retired during join, retrying");
                    connection = rejected;
                }
            }
        }
    }

    /// Remove a connection from a room.
    ///
    /// Returns the removed connection, or `None` if the room or the
    /// connection is unknown. The room itself is left in place.
    pub fn leave(&self, room_id: &str, connection_id: ConnectionId) -> Option<Connection> {
        let room = self.get(room_id)?;
        room.remove_member(connection_id)
    }

    /// Evict rooms that have been empty for at least `grace`.
    ///
    /// Each room is retired under the map's shard lock, so a concurrent join
    /// either lands before the retirement (and the room survives) or retries
    /// on a new room.
    pub fn evict_idle(&self, grace: Duration) -> Vec<RoomId> {
        let candidates: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().member_count() == 0)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::new();
        for room_id in candidates {
            if self
                .rooms
                .remove_if(&room_id, |_, room| room.try_retire(grace))
                .is_some()
            {
                debug!(room = %room_id, "Room evicted");
                evicted.push(room_id);
            }
        }
        evicted
    }

    /// Spawn a task that calls [`evict_idle`](Self::evict_idle) every
    /// `interval`. The task stops once the registry is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, grace: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        info!(?interval, ?grace, "Starting idle room reaper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.evict_idle(grace);
                if !evicted.is_empty() {
                    info!(count = evicted.len(), "Evicted idle rooms");
                }
            }
        })
    }

    /// Number of registered rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            connection_count: self
                .rooms
                .iter()
                .map(|entry| entry.value().member_count())
                .sum(),
            dispatchers_started: self.dispatchers_started.load(Ordering::Relaxed),
            dropped_members: self.dropped_members.load(Ordering::Relaxed),
        }
    }

    /// Close every connection and drop every room.
    ///
    /// Returns the number of connections closed.
    pub fn shutdown(&self) -> usize {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.rooms.clear();

        let closed = rooms.iter().map(|room| room.close_all()).sum();
        info!(rooms = rooms.len(), connections = closed, "Registry shut down");
        closed
    }
}
