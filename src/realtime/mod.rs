//! Realtime push to connected clients.

pub mod hub;
pub mod protocol;
pub mod server;

pub use hub::{ConnectionId, PushMessage, RealtimeHub};
pub use protocol::ClientMessage;
pub use server::{serve, Gateway, TransportError};
