use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::warn;
use uuid::Uuid;

use forum_types::events::ForumEvent;
use forum_types::models::EventId;

/// A push serialized once and fanned out to every connection task.
/// Each connection forwards only rooms it has joined.
#[derive(Debug, Clone)]
pub struct RoomBroadcast {
    pub event_id: EventId,
    /// Connection that caused the push; it does not receive it back.
    pub origin: Option<Uuid>,
    pub json: Arc<str>,
}

/// Manages event rooms and broadcasts pushes to their members.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel: every connection receives every push and filters by room
    broadcast_tx: broadcast::Sender<RoomBroadcast>,

    /// Room membership: event_id -> connection ids. Ephemeral, rebuilt by
    /// joins. Connection tasks consult it before forwarding a push.
    rooms: RwLock<HashMap<EventId, HashSet<Uuid>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// `capacity` bounds how far a slow connection may fall behind before
    /// it is considered lagged.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to room pushes. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomBroadcast> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Push an event to every member of its room, the author's connection included.
    pub fn publish(&self, event: &ForumEvent) {
        self.send(None, event);
    }

    /// Push an event to every member of its room except `origin`.
    pub fn publish_from(&self, origin: Uuid, event: &ForumEvent) {
        self.send(Some(origin), event);
    }

    fn send(&self, origin: Option<Uuid>, event: &ForumEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize {} push: {}", event.kind(), e);
                return;
            }
        };
        // No receivers just means nobody is connected
        let _ = self.inner.broadcast_tx.send(RoomBroadcast {
            event_id: event.event_id().clone(),
            origin,
            json: json.into(),
        });
    }

    pub async fn join(&self, event_id: EventId, conn_id: Uuid) {
        self.inner
            .rooms
            .write()
            .await
            .entry(event_id)
            .or_default()
            .insert(conn_id);
    }

    pub async fn leave(&self, event_id: &EventId, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.get_mut(event_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(event_id);
            }
        }
    }

    /// Drop a closed connection from every room it joined.
    pub async fn leave_all(&self, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    pub async fn is_member(&self, event_id: &EventId, conn_id: Uuid) -> bool {
        self.inner
            .rooms
            .read()
            .await
            .get(event_id)
            .is_some_and(|members| members.contains(&conn_id))
    }

    pub async fn room_size(&self, event_id: &EventId) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(event_id)
            .map_or(0, HashSet::len)
    }
}
