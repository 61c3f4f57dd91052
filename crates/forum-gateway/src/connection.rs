use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use forum_db::Database;
use forum_types::api::Claims;
use forum_types::events::{ClientCommand, ForumEvent};

use crate::dispatcher::{Dispatcher, RoomBroadcast};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// What the send task does with one broadcast.
#[derive(Debug, PartialEq)]
enum Forward {
    Send(Arc<str>),
    Skip,
    /// The connection missed pushes or the dispatcher is gone. Closing makes
    /// the client reconnect and re-fetch, which recovers what was lost.
    Close,
}

/// Handle a pre-authenticated WebSocket connection.
/// The JWT was already validated at the HTTP upgrade layer, so the
/// connection goes straight into the event loop. Room membership starts
/// empty; clients re-join their rooms after every connect.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    claims: Claims,
) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();
    let user = claims.name.clone();

    info!("{} ({}) connected to gateway [conn={}]", user, claims.sub, conn_id);

    let mut broadcast_rx = dispatcher.subscribe();
    let send_dispatcher = dispatcher.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room pushes -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => match forward(&send_dispatcher, conn_id, result).await {
                    Forward::Send(json) => {
                        if sender.send(Message::Text(json.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Forward::Skip => {}
                    Forward::Close => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let recv_claims = claims.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &db, &recv_claims, conn_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_claims.name,
                            recv_claims.sub,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.leave_all(conn_id).await;
    info!("{} ({}) disconnected from gateway [conn={}]", user, claims.sub, conn_id);
}

async fn forward(
    dispatcher: &Dispatcher,
    conn_id: Uuid,
    result: Result<RoomBroadcast, RecvError>,
) -> Forward {
    let msg = match result {
        Ok(msg) => msg,
        Err(RecvError::Lagged(n)) => {
            warn!("Connection {} lagged by {} pushes, closing", conn_id, n);
            return Forward::Close;
        }
        Err(RecvError::Closed) => return Forward::Close,
    };

    if msg.origin == Some(conn_id) || !dispatcher.is_member(&msg.event_id, conn_id).await {
        return Forward::Skip;
    }
    Forward::Send(msg.json)
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    claims: &Claims,
    conn_id: Uuid,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::JoinEvent { event_id } => {
            let lookup_db = db.clone();
            let eid = event_id.to_string();
            let uid = claims.sub.to_string();
            let access = tokio::task::spawn_blocking(move || lookup_db.get_access(&eid, &uid)).await;

            match access {
                Ok(Ok(access)) if access.can_join() => {
                    dispatcher.join(event_id.clone(), conn_id).await;
                    info!("{} ({}) joined room {} as {}", claims.name, claims.sub, event_id, access.as_str());
                }
                Ok(Ok(_)) => {
                    warn!("{} ({}) may not join room {}", claims.name, claims.sub, event_id);
                }
                Ok(Err(e)) => warn!("Access lookup for room {} failed: {}", event_id, e),
                Err(e) => warn!("Access lookup task failed: {}", e),
            }
        }

        ClientCommand::LeaveEvent { event_id } => {
            dispatcher.leave(&event_id, conn_id).await;
            info!("{} ({}) left room {}", claims.name, claims.sub, event_id);
        }

        ClientCommand::Typing { event_id, user_name } => {
            if dispatcher.is_member(&event_id, conn_id).await {
                dispatcher.publish_from(conn_id, &ForumEvent::UserTyping { event_id, user_name });
            } else {
                debug!("{} typing in unjoined room {}", claims.name, event_id);
            }
        }

        ClientCommand::StopTyping { event_id } => {
            if dispatcher.is_member(&event_id, conn_id).await {
                dispatcher.publish_from(conn_id, &ForumEvent::UserStoppedTyping { event_id });
            }
        }
    }
}
