//! Per-room dispatcher task.
//!
//! Each room has exactly one dispatcher. It drains the room's queue in FIFO
//! order and fans each event out to the members present at that moment.
//! The task ends when every sender of the queue is gone, which happens once
//! the room has been evicted and the last handle to it dropped.

use std::sync::Arc;

use reelroom_protocol::ServerEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::room::RoomState;

/// Spawn the dispatcher for a room.
pub(crate) fn spawn(
    state: Arc<RoomState>,
    rx: mpsc::UnboundedReceiver<Arc<ServerEvent>>,
) -> JoinHandle<()> {
    tokio::spawn(run(state, rx))
}

async fn run(state: Arc<RoomState>, mut rx: mpsc::UnboundedReceiver<Arc<ServerEvent>>) {
    debug!(room = %state.id(), "Dispatcher started");

    let mut dispatched: u64 = 0;
    while let Some(event) = rx.recv().await {
        let result = state.fan_out(&event);
        dispatched += 1;
        trace!(
            room = %state.id(),
            event = event.name(),
            delivered = result.delivered,
            dropped = result.dropped,
            "Event dispatched"
        );
    }

    debug!(room = %state.id(), dispatched, "Dispatcher terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::room::Room;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dispatcher_delivers_in_order() {
        let (room, rx) = Room::new("r1", Arc::new(AtomicU64::new(0)));
        let handle = spawn(Arc::clone(room.state()), rx);

        let (conn, mut outbound) = Connection::new("r1", "", 16);
        room.add_member(conn).unwrap();

        for code in 0..10 {
            room.enqueue(ServerEvent::error(code, "seq")).unwrap();
        }
        for code in 0..10 {
            let event = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.error_code(), Some(code));
        }

        drop(room);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
