//! # reelroom-protocol
//!
//! Wire protocol definitions for the Reelroom live room hub.
//!
//! Clients and the server exchange JSON objects over a websocket, one event
//! per frame, discriminated by `event_type`.
//!
//! ## Events
//!
//! - Client → server: `message`, `like`
//! - Server → client: `first_message`, `first_like`, `message`, `total_like`, `error`
//!
//! ## Example
//!
//! ```rust
//! use reelroom_protocol::{codec, ClientEvent};
//!
//! let event = codec::decode(r#"{"event_type":"like","user_id":"B"}"#).unwrap();
//! assert_eq!(event, ClientEvent::like("B"));
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{error_codes, ChatInput, ChatMessage, ClientEvent, LikeUpdate, ServerEvent};
