//! One authenticated WebSocket per client process.
//!
//! Rooms joined through the session are remembered and re-joined after every
//! reconnect. Inbound pushes are handed to at most one handler per
//! [`PushKind`]; registering again replaces the previous handler.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use forum_types::events::{ClientCommand, ForumEvent, PushKind};
use forum_types::models::EventId;

use crate::config::SyncConfig;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub type PushHandler = Arc<dyn Fn(ForumEvent) + Send + Sync>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the socket loop ended.
enum Exit {
    Requested,
    Dropped,
}

#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    token: String,
    attempts: u32,
    delay: Duration,
    handlers: RwLock<HashMap<PushKind, PushHandler>>,
    rooms: Mutex<HashSet<EventId>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientCommand>>>,
    state: watch::Sender<ConnectionState>,
    stopped: AtomicBool,
    connecting: tokio::sync::Mutex<()>,
}

impl TransportSession {
    pub fn new(config: &SyncConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: config.gateway_url.clone(),
                token: config.token.clone(),
                attempts: config.reconnect_attempts.max(1),
                delay: config.reconnect_delay,
                handlers: RwLock::new(HashMap::new()),
                rooms: Mutex::new(HashSet::new()),
                outbound: Mutex::new(None),
                state,
                stopped: AtomicBool::new(false),
                connecting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Open the channel, retrying with a fixed delay. A no-op when already
    /// connected.
    pub async fn connect(&self) -> Result<(), SyncError> {
        self.inner.stopped.store(false, Ordering::Release);

        let _guard = self.inner.connecting.lock().await;
        if self.is_connected() {
            info!("Transport already connected");
            return Ok(());
        }

        let (ws_stream, outbound) = self.dial().await?;
        tokio::spawn(self.clone().supervise(ws_stream, outbound));
        Ok(())
    }

    /// Bounded attempts with a fixed delay between them.
    async fn dial(&self) -> Result<(WsStream, mpsc::UnboundedReceiver<ClientCommand>), SyncError> {
        for attempt in 1..=self.inner.attempts {
            if self.inner.stopped.load(Ordering::Acquire) {
                break;
            }
            self.inner.state.send_replace(ConnectionState::Connecting);

            match self.open().await {
                Ok(ws_stream) => {
                    info!("Transport connected to {} (attempt {})", self.inner.url, attempt);
                    return Ok((ws_stream, self.attach()));
                }
                Err(e) => {
                    warn!(
                        "Transport connect attempt {}/{} failed: {}",
                        attempt, self.inner.attempts, e
                    );
                    if attempt < self.inner.attempts {
                        tokio::time::sleep(self.inner.delay).await;
                    }
                }
            }
        }

        self.inner.state.send_replace(ConnectionState::Disconnected);
        Err(SyncError::TransportUnavailable)
    }

    async fn open(&self) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
        let mut request = self.inner.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.inner.token))
            .map_err(tokio_tungstenite::tungstenite::http::Error::from)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(ws_stream)
    }

    /// Install a fresh outbound queue, primed with joins for every
    /// remembered room, and mark the session connected.
    fn attach(&self) -> mpsc::UnboundedReceiver<ClientCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event_id in self.rooms() {
            let _ = tx.send(ClientCommand::JoinEvent { event_id });
        }
        *lock(&self.inner.outbound) = Some(tx);
        self.inner.state.send_replace(ConnectionState::Connected);
        rx
    }

    /// Owns the socket for the life of the session, redialing after drops.
    async fn supervise(self, mut ws_stream: WsStream, mut outbound: mpsc::UnboundedReceiver<ClientCommand>) {
        loop {
            // disconnect() already cleared the queue and state
            if let Exit::Requested = self.run(ws_stream, outbound).await {
                return;
            }
            *lock(&self.inner.outbound) = None;
            self.inner.state.send_replace(ConnectionState::Disconnected);
            if self.inner.stopped.load(Ordering::Acquire) {
                return;
            }

            warn!("Transport dropped, reconnecting");
            let _guard = self.inner.connecting.lock().await;
            if self.is_connected() {
                // Someone else reconnected in the meantime
                return;
            }
            match self.dial().await {
                Ok((next_stream, next_outbound)) => {
                    ws_stream = next_stream;
                    outbound = next_outbound;
                }
                Err(_) => {
                    warn!("Transport gave up reconnecting; live updates fall back to refresh");
                    return;
                }
            }
        }
    }

    async fn run(&self, ws_stream: WsStream, mut outbound: mpsc::UnboundedReceiver<ClientCommand>) -> Exit {
        let (mut sink, mut stream) = ws_stream.split();

        loop {
            tokio::select! {
                cmd = outbound.recv() => {
                    let Some(cmd) = cmd else {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return Exit::Requested;
                    };
                    let json = match serde_json::to_string(&cmd) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to encode command: {}", e);
                            continue;
                        }
                    };
                    if sink.send(WsMessage::Text(json.into())).await.is_err() {
                        return Exit::Dropped;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(e) = self.dispatch_frame(text.as_str()) {
                            warn!("Dropping push: {}", e);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Exit::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Transport read error: {}", e);
                        return Exit::Dropped;
                    }
                }
            }
        }
    }

    /// Decode one inbound frame and hand it to its handler.
    pub(crate) fn dispatch_frame(&self, text: &str) -> Result<(), SyncError> {
        let event: ForumEvent = serde_json::from_str(text).map_err(|e| {
            SyncError::MalformedPush(format!("{} -- raw: {}", e, text.chars().take(200).collect::<String>()))
        })?;

        let kind = event.kind();
        let handler = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned();

        match handler {
            Some(handler) => handler(event),
            None => debug!("No handler for {} push", kind),
        }
        Ok(())
    }

    /// Register the handler for one push kind, replacing any previous one.
    pub fn on<F>(&self, kind: PushKind, handler: F)
    where
        F: Fn(ForumEvent) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, Arc::new(handler));
    }

    pub fn off(&self, kind: PushKind) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&kind);
    }

    pub fn clear_handlers(&self) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Subscribe to an event room, now and after every reconnect.
    pub fn join_room(&self, event_id: &EventId) {
        lock(&self.inner.rooms).insert(event_id.clone());
        self.emit(ClientCommand::JoinEvent {
            event_id: event_id.clone(),
        });
        info!("Joined room {}", event_id);
    }

    pub fn leave_room(&self, event_id: &EventId) {
        if lock(&self.inner.rooms).remove(event_id) {
            self.emit(ClientCommand::LeaveEvent {
                event_id: event_id.clone(),
            });
            info!("Left room {}", event_id);
        }
    }

    pub fn rooms(&self) -> Vec<EventId> {
        lock(&self.inner.rooms).iter().cloned().collect()
    }

    /// Send a command if connected. Dropped otherwise; returns whether it
    /// was queued.
    pub fn emit(&self, command: ClientCommand) -> bool {
        match lock(&self.inner.outbound).as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => {
                debug!("Transport down, dropping {:?}", command);
                false
            }
        }
    }

    /// Close the channel and stop reconnecting. Safe to call repeatedly.
    pub fn disconnect(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        if lock(&self.inner.outbound).take().is_some() {
            info!("Transport disconnected");
        }
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn session() -> TransportSession {
        let config = SyncConfig {
            reconnect_attempts: 2,
            reconnect_delay: Duration::from_millis(10),
            ..SyncConfig::for_server("http://127.0.0.1:9", "token")
        };
        TransportSession::new(&config)
    }

    const PIN_FRAME: &str =
        r#"{"type":"message-pinned","data":{"eventId":"evt1","messageId":"m1","isPinned":true}}"#;

    #[test]
    fn re_registering_replaces_the_handler() {
        let transport = session();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let c = first.clone();
        transport.on(PushKind::MessagePinned, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = second.clone();
        transport.on(PushKind::MessagePinned, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        transport.dispatch_frame(PIN_FRAME).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        transport.off(PushKind::MessagePinned);
        transport.dispatch_frame(PIN_FRAME).unwrap();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_frames_are_rejected_without_side_effects() {
        let transport = session();
        let hits = Arc::new(AtomicUsize::new(0));
        let c = hits.clone();
        transport.on(PushKind::MessagePinned, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let err = transport.dispatch_frame(r#"{"type":"message-pinned","data":{}}"#);
        assert!(matches!(err, Err(SyncError::MalformedPush(_))));
        assert!(transport.dispatch_frame("not json").is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn emit_while_disconnected_is_dropped() {
        let transport = session();
        transport.join_room(&"evt1".into());
        assert!(!transport.emit(ClientCommand::StopTyping {
            event_id: "evt1".into()
        }));
        assert_eq!(transport.rooms(), vec![EventId::from("evt1")]);

        transport.leave_room(&"evt1".into());
        transport.leave_room(&"evt1".into());
        assert!(transport.rooms().is_empty());
        transport.disconnect();
        transport.disconnect();
        assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_gives_up_after_bounded_attempts() {
        let transport = session();
        let result = transport.connect().await;
        assert_eq!(result, Err(SyncError::TransportUnavailable));
        assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
    }
}
