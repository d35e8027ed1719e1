//! # reelroom-core
//!
//! Room broadcast hub for Reelroom live video rooms.
//!
//! This crate provides the building blocks behind the websocket endpoint:
//!
//! - **Connection** - Hub-side handle of one client, with a bounded outbound queue
//! - **Room** - Membership set plus a FIFO event queue
//! - **Dispatcher** - One task per room fanning events out to members
//! - **RoomRegistry** - Lazily created rooms with idle eviction
//! - **EventRouter** - Read side of a connection: decode, persist, enqueue
//! - **Hub** - Join/leave facade over the registry and the stores
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ EventRouter │────▶│ Room queue  │────▶│ Dispatcher  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌─────────────┐                        ┌─────────────┐
//! │ Chat / Like │                        │  Outbound   │
//! │   stores    │                        │   queues    │
//! └─────────────┘                        └─────────────┘
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod memory;
pub mod registry;
pub mod room;
pub mod router;
pub mod store;
pub mod time;

pub use connection::{Connection, ConnectionId, Outbound};
pub use error::{DeliveryError, HubError, StoreError, TransportError};
pub use hub::{Hub, HubConfig, Session};
pub use memory::MemoryStore;
pub use registry::{RegistryStats, RoomId, RoomRegistry};
pub use room::Room;
pub use router::{EventRouter, RouteOutcome};
pub use store::{ChatStore, LikeStore, LikeToggle, NewMessage};
pub use time::{Clock, FixedClock, MonotonicClock, SystemClock};
