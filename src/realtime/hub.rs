//! Registry of live client connections.
//!
//! Each connection is a numbered handle owning the sending half of an
//! unbounded channel; the transport drains the receiving half. Identity
//! binding and room membership are independent indexes over the same
//! handles. Delivery is at-most-once and unacknowledged: a message to a
//! handle whose receiver is gone is dropped.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};

pub type ConnectionId = u64;

/// A named event pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub event: String,
    pub data: Value,
}

impl PushMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

pub type PushSender = mpsc::UnboundedSender<PushMessage>;
pub type PushReceiver = mpsc::UnboundedReceiver<PushMessage>;

struct Connection {
    sender: PushSender,
    identity: Option<String>,
    rooms: HashSet<u64>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    identities: HashMap<String, HashSet<ConnectionId>>,
    rooms: HashMap<u64, HashSet<ConnectionId>>,
}

impl Registry {
    fn unbind_identity(&mut self, id: ConnectionId, identity: &str) {
        if let Some(handles) = self.identities.get_mut(identity) {
            handles.remove(&id);
            if handles.is_empty() {
                self.identities.remove(identity);
            }
        }
    }

    fn leave_room(&mut self, id: ConnectionId, room_id: u64) {
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
    }

    fn deliver<'a>(&self, targets: impl Iterator<Item = &'a ConnectionId>, message: &PushMessage) -> usize {
        let mut delivered = 0;
        for id in targets {
            if let Some(connection) = self.connections.get(id) {
                if connection.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    debug!("Connection {} is gone, dropping {}", id, message.event);
                }
            }
        }
        delivered
    }
}

pub struct RealtimeHub {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection and return its handle and message receiver.
    pub async fn on_connect(&self) -> (ConnectionId, PushReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.write().await.connections.insert(
            id,
            Connection {
                sender,
                identity: None,
                rooms: HashSet::new(),
            },
        );
        debug!("Connection {} registered", id);
        (id, receiver)
    }

    /// Bind a connection to an identity, replacing any previous binding.
    /// Returns false for an unknown connection.
    pub async fn on_authenticate(&self, id: ConnectionId, identity: &str) -> bool {
        let mut registry = self.registry.write().await;
        let previous = match registry.connections.get_mut(&id) {
            Some(connection) => connection.identity.replace(identity.to_string()),
            None => return false,
        };
        if let Some(previous) = previous {
            registry.unbind_identity(id, &previous);
        }
        registry
            .identities
            .entry(identity.to_string())
            .or_default()
            .insert(id);
        info!("Connection {} authenticated as {}", id, identity);
        true
    }

    pub async fn on_join_room(&self, id: ConnectionId, room_id: u64) -> bool {
        let mut registry = self.registry.write().await;
        match registry.connections.get_mut(&id) {
            Some(connection) => {
                connection.rooms.insert(room_id);
            }
            None => return false,
        }
        registry.rooms.entry(room_id).or_default().insert(id);
        debug!("Connection {} joined room {}", id, room_id);
        true
    }

    pub async fn on_leave_room(&self, id: ConnectionId, room_id: u64) -> bool {
        let mut registry = self.registry.write().await;
        let was_member = registry
            .connections
            .get_mut(&id)
            .is_some_and(|connection| connection.rooms.remove(&room_id));
        registry.leave_room(id, room_id);
        if was_member {
            debug!("Connection {} left room {}", id, room_id);
        }
        was_member
    }

    /// Drop a connection from every index it appears in.
    pub async fn on_disconnect(&self, id: ConnectionId) {
        let mut registry = self.registry.write().await;
        let Some(connection) = registry.connections.remove(&id) else {
            return;
        };
        for room_id in &connection.rooms {
            registry.leave_room(id, *room_id);
        }
        if let Some(identity) = &connection.identity {
            registry.unbind_identity(id, identity);
        }
        debug!("Connection {} disconnected", id);
    }

    pub async fn broadcast_to_room(&self, room_id: u64, event: &str, data: Value) -> usize {
        let message = PushMessage::new(event, data);
        let registry = self.registry.read().await;
        let delivered = match registry.rooms.get(&room_id) {
            Some(members) => registry.deliver(members.iter(), &message),
            None => 0,
        };
        debug!("{} to room {} reached {} connections", event, room_id, delivered);
        delivered
    }

    pub async fn broadcast_to_all(&self, event: &str, data: Value) -> usize {
        let message = PushMessage::new(event, data);
        let registry = self.registry.read().await;
        let delivered = registry.deliver(registry.connections.keys(), &message);
        debug!("{} to all reached {} connections", event, delivered);
        delivered
    }

    /// Fan out to every open connection bound to `identity`.
    pub async fn notify_identity(&self, identity: &str, event: &str, data: Value) -> usize {
        let message = PushMessage::new(event, data);
        let registry = self.registry.read().await;
        match registry.identities.get(identity) {
            Some(handles) => registry.deliver(handles.iter(), &message),
            None => 0,
        }
    }

    /// Push to a single connection, used for replies to control messages.
    pub async fn send_to(&self, id: ConnectionId, message: PushMessage) -> bool {
        let registry = self.registry.read().await;
        registry.deliver(std::iter::once(&id), &message) == 1
    }

    /// Drop every connection. Transports see their channel close and hang up.
    pub async fn close_all(&self) -> usize {
        let mut registry = self.registry.write().await;
        let closed = registry.connections.len();
        *registry = Registry::default();
        info!("Closed {} realtime connections", closed);
        closed
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    pub async fn identity_count(&self) -> usize {
        self.registry.read().await.identities.len()
    }

    pub async fn room_member_count(&self, room_id: u64) -> usize {
        self.registry
            .read()
            .await
            .rooms
            .get(&room_id)
            .map_or(0, HashSet::len)
    }

    pub async fn identity_of(&self, id: ConnectionId) -> Option<String> {
        self.registry
            .read()
            .await
            .connections
            .get(&id)
            .and_then(|connection| connection.identity.clone())
    }
}

impl std::fmt::Debug for RealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeHub")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
