//! Client connections.
//!
//! A [`Connection`] is the hub-side handle of one websocket client. It is
//! cheap to clone: the room's membership set, the event router and the
//! server handler all hold clones of the same handle. The matching
//! [`Outbound`] half is owned by the connection's writer task.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use reelroom_protocol::ServerEvent;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::trace;

use crate::error::DeliveryError;
use crate::registry::RoomId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

/// Open/closed flag shared by a connection and its outbound half.
#[derive(Debug)]
struct CloseSignal {
    open: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Returns `true` on the first call only.
    fn close(&self) -> bool {
        if self.open.swap(false, Ordering::AcqRel) {
            // notify_one stores a permit if the writer is not waiting yet
            self.notify.notify_one();
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct Inner {
    id: ConnectionId,
    room_id: RoomId,
    user_id: String,
    outbound: mpsc::Sender<Arc<ServerEvent>>,
    signal: Arc<CloseSignal>,
    /// Set once the departure has been handled, whoever removed the member.
    departed: AtomicBool,
}

/// A client joined to exactly one room.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a connection bound to `room_id` with an outbound queue of
    /// `buffer` events.
    #[must_use]
    pub fn new(
        room_id: impl Into<RoomId>,
        user_id: impl Into<String>,
        buffer: usize,
    ) -> (Self, Outbound) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let signal = Arc::new(CloseSignal {
            open: AtomicBool::new(true),
            notify: Notify::new(),
        });

        let connection = Self {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                room_id: room_id.into(),
                user_id: user_id.into(),
                outbound: tx,
                signal: Arc::clone(&signal),
                departed: AtomicBool::new(false),
            }),
        };

        (connection, Outbound { rx, signal })
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// The room this connection joined.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    /// User id supplied at upgrade time. May be empty.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.signal.is_open()
    }

    /// Queue an event for this connection without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the connection is closed or its
    /// writer is gone, and [`DeliveryError::Full`] if the outbound queue is
    /// full.
    pub fn send(&self, event: Arc<ServerEvent>) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed);
        }
        self.inner.outbound.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Close the connection. The writer stops at its next receive.
    ///
    /// Returns `true` if this call closed it.
    pub fn close(&self) -> bool {
        let closed = self.inner.signal.close();
        if closed {
            trace!(connection = %self.id(), room = %self.room_id(), "Connection closed");
        }
        closed
    }

    /// Mark the connection as departed. Returns `true` on the first call only.
    pub(crate) fn mark_departed(&self) -> bool {
        !self.inner.departed.swap(true, Ordering::AcqRel)
    }
}

/// Receiving half of a connection's outbound queue.
#[derive(Debug)]
pub struct Outbound {
    rx: mpsc::Receiver<Arc<ServerEvent>>,
    signal: Arc<CloseSignal>,
}

impl Outbound {
    /// Wait for the next event to write.
    ///
    /// Returns `None` once the connection is closed; pending events are
    /// discarded.
    pub async fn recv(&mut self) -> Option<Arc<ServerEvent>> {
        if !self.signal.is_open() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.signal.notify.notified() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Take an already queued event, if any.
    pub fn try_recv(&mut self) -> Option<Arc<ServerEvent>> {
        if !self.signal.is_open() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.signal.is_open()
    }
}
