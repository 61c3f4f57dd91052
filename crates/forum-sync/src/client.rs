use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use forum_types::events::{ForumEvent, PushKind};
use forum_types::models::EventId;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::handle::{RoomHandle, spawn_room};
use crate::identity::{AccessProvider, IdentityProvider, Viewer, ViewerRole};
use crate::notifications::NotificationCenter;
use crate::room::ForumRoom;
use crate::store::{HttpMessageStore, MessageStore};
use crate::transport::TransportSession;

/// Open rooms by event id. The generation keeps a closing room from
/// removing the route of a newer room for the same event.
type Routes = Arc<Mutex<HashMap<EventId, (u64, mpsc::UnboundedSender<ForumEvent>)>>>;

/// Process-wide entry point: one transport, one store, one viewer, and the
/// shared notification center for every room opened through it.
pub struct ForumClient<S = HttpMessageStore> {
    config: SyncConfig,
    store: S,
    viewer: Viewer,
    transport: TransportSession,
    notifications: NotificationCenter,
    routes: Routes,
    generation: AtomicU64,
}

impl ForumClient<HttpMessageStore> {
    /// Resolve the viewer and open the live channel. A channel that cannot
    /// be opened is not an error; rooms fall back to periodic refresh.
    pub async fn connect(config: SyncConfig) -> Result<Self, SyncError> {
        let store = HttpMessageStore::new(&config.api_url, config.token.clone());
        let viewer = store.current_viewer().await?;
        info!("Signed in as {} ({})", viewer.name, viewer.role);

        let client = Self::new(config, store, viewer);
        if let Err(e) = client.transport.connect().await {
            warn!("Live updates unavailable: {}", e);
        }
        Ok(client)
    }
}

impl<S: MessageStore + AccessProvider> ForumClient<S> {
    pub fn new(config: SyncConfig, store: S, viewer: Viewer) -> Self {
        let transport = TransportSession::new(&config);
        let routes: Routes = Arc::default();

        for kind in PushKind::ALL {
            let routes = routes.clone();
            transport.on(kind, move |event| route(&routes, event));
        }

        Self {
            config,
            store,
            viewer,
            transport,
            notifications: NotificationCenter::new(),
            routes,
            generation: AtomicU64::new(0),
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn transport(&self) -> &TransportSession {
        &self.transport
    }

    /// Open an event's forum. Only organizers and registered attendees get in.
    pub async fn open_room(&self, event_id: &EventId) -> Result<RoomHandle, SyncError> {
        let access = self.store.access(event_id).await?;
        if !access.can_join() {
            return Err(SyncError::NotAMember);
        }
        let role = ViewerRole::for_event(self.viewer.role, access);

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let replaced = lock(&self.routes).insert(event_id.clone(), (generation, tx));
        if replaced.is_some() {
            debug!("Room {} reopened; the previous handle stops receiving pushes", event_id);
        }
        self.transport.join_room(event_id);

        let room = ForumRoom::new(
            event_id.clone(),
            self.viewer.clone(),
            role,
            self.notifications.clone(),
            self.config.typing_ttl,
        );

        let routes = self.routes.clone();
        let transport = self.transport.clone();
        let closing = event_id.clone();
        let on_close = move || {
            let mut routes = lock(&routes);
            if routes.get(&closing).is_some_and(|(g, _)| *g == generation) {
                routes.remove(&closing);
                transport.leave_room(&closing);
            }
        };

        Ok(spawn_room(
            room,
            self.store.clone(),
            self.transport.clone(),
            rx,
            self.config.refresh_interval,
            on_close,
        ))
    }

    /// Drop every handler and close the live channel.
    pub fn shutdown(&self) {
        self.transport.clear_handlers();
        self.transport.disconnect();
    }
}

fn route(routes: &Routes, event: ForumEvent) {
    let routes = lock(routes);
    match routes.get(event.event_id()) {
        Some((_, tx)) => {
            let _ = tx.send(event);
        }
        None => debug!("No open room for {} push in {}", event.kind(), event.event_id()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
