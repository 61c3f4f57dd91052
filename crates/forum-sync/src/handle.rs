//! The task that drives one [`ForumRoom`] and the handle the UI holds.

use std::future::pending;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use forum_types::events::ForumEvent;
use forum_types::models::{EventId, MessageId};

use crate::error::SyncError;
use crate::propagator::Moderation;
use crate::room::{Action, Command, Effect, ForumRoom, Notice, RoomView, StoreReply, StoreRequest};
use crate::store::MessageStore;
use crate::transport::TransportSession;

enum RoomMessage {
    Command(Command, oneshot::Sender<Result<(), SyncError>>),
    Close,
}

/// UI-side handle to an open room. Dropping it closes the room.
pub struct RoomHandle {
    event_id: EventId,
    commands: mpsc::UnboundedSender<RoomMessage>,
    view: watch::Receiver<RoomView>,
    notices: mpsc::UnboundedReceiver<Notice>,
}

impl RoomHandle {
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Latest published snapshot.
    pub fn view(&self) -> RoomView {
        self.view.borrow().clone()
    }

    /// A receiver of view snapshots, independent of this handle's borrows.
    pub fn watch(&self) -> watch::Receiver<RoomView> {
        self.view.clone()
    }

    /// Wait until the view satisfies `pred`, returning that snapshot.
    pub async fn wait_for(&self, mut pred: impl FnMut(&RoomView) -> bool) -> Result<RoomView, SyncError> {
        self.watch()
            .wait_for(|v| pred(v))
            .await
            .map(|v| v.clone())
            .map_err(|_| SyncError::RoomClosed)
    }

    /// Next user-visible failure, `None` once the room is closed.
    pub async fn next_notice(&mut self) -> Option<Notice> {
        self.notices.recv().await
    }

    async fn command(&self, command: Command) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(RoomMessage::Command(command, tx))
            .map_err(|_| SyncError::RoomClosed)?;
        rx.await.map_err(|_| SyncError::RoomClosed)?
    }

    pub async fn send(&self, content: impl Into<String>) -> Result<(), SyncError> {
        self.command(Command::Send {
            content: content.into(),
            parent_message_id: None,
            is_announcement: false,
        })
        .await
    }

    pub async fn reply(&self, parent: &MessageId, content: impl Into<String>) -> Result<(), SyncError> {
        self.command(Command::Send {
            content: content.into(),
            parent_message_id: Some(parent.clone()),
            is_announcement: false,
        })
        .await
    }

    pub async fn announce(&self, content: impl Into<String>) -> Result<(), SyncError> {
        self.command(Command::Send {
            content: content.into(),
            parent_message_id: None,
            is_announcement: true,
        })
        .await
    }

    pub async fn toggle_pin(&self, message_id: &MessageId) -> Result<(), SyncError> {
        self.command(Command::Moderate(Moderation::TogglePin(message_id.clone())))
            .await
    }

    pub async fn delete(&self, message_id: &MessageId) -> Result<(), SyncError> {
        self.command(Command::Moderate(Moderation::Delete(message_id.clone())))
            .await
    }

    pub async fn react(&self, message_id: &MessageId, emoji: &str) -> Result<(), SyncError> {
        self.command(Command::Moderate(Moderation::React {
            message_id: message_id.clone(),
            emoji: emoji.to_string(),
        }))
        .await
    }

    pub async fn typing(&self) -> Result<(), SyncError> {
        self.command(Command::Typing).await
    }

    pub async fn stop_typing(&self) -> Result<(), SyncError> {
        self.command(Command::StopTyping).await
    }

    pub async fn focus(&self, focused: bool) -> Result<(), SyncError> {
        self.command(Command::Focus(focused)).await
    }

    /// Leave the room. Safe to call more than once.
    pub fn close(&self) {
        let _ = self.commands.send(RoomMessage::Close);
    }
}

/// Spawn the event loop for `room`. `on_close` runs once when the loop ends.
pub(crate) fn spawn_room<S, F>(
    mut room: ForumRoom,
    store: S,
    transport: TransportSession,
    mut pushes: mpsc::UnboundedReceiver<ForumEvent>,
    refresh_every: Duration,
    on_close: F,
) -> RoomHandle
where
    S: MessageStore,
    F: FnOnce() + Send + 'static,
{
    let event_id = room.event_id().clone();
    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    let (notices_tx, notices) = mpsc::unbounded_channel();
    let (view_tx, view) = watch::channel(room.view(Instant::now()));

    tokio::spawn(async move {
        let (done_tx, mut done) = mpsc::unbounded_channel::<(u64, Result<StoreReply, SyncError>)>();
        let mut transport_state = transport.watch_state();
        let mut refresh: Option<Interval> = None;

        let runner = Runner {
            store,
            transport,
            done: done_tx,
            notices: notices_tx,
        };
        let connected = runner.transport.is_connected();
        runner.execute(room.enter(connected));

        loop {
            sync_refresh(&mut refresh, room.wants_refresh(), refresh_every);
            view_tx.send_replace(room.view(Instant::now()));
            let typing_deadline = room.typing_deadline();

            let effects = tokio::select! {
                message = commands.recv() => match message {
                    Some(RoomMessage::Command(command, reply)) => match room.command(command) {
                        Ok(effects) => {
                            let _ = reply.send(Ok(()));
                            effects
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                    },
                    Some(RoomMessage::Close) | None => break,
                },
                Some(event) = pushes.recv() => room.reduce(Action::Push(event), Instant::now()),
                Some((op_id, result)) = done.recv() => room.reduce(Action::Completed { op_id, result }, Instant::now()),
                _ = tick(&mut refresh) => room.reduce(Action::RefreshTick, Instant::now()),
                _ = sleep_until(typing_deadline) => room.reduce(Action::TypingDeadline, Instant::now()),
                Ok(()) = transport_state.changed() => {
                    let state = *transport_state.borrow_and_update();
                    room.reduce(Action::Transport(state), Instant::now())
                }
            };
            runner.execute(effects);
        }

        // Dropping the timer cancels it; late completions go nowhere
        refresh.take();
        on_close();
        info!("Closed forum room {}", room.event_id());
    });

    RoomHandle {
        event_id,
        commands: commands_tx,
        view,
        notices,
    }
}

struct Runner<S> {
    store: S,
    transport: TransportSession,
    done: mpsc::UnboundedSender<(u64, Result<StoreReply, SyncError>)>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl<S: MessageStore> Runner<S> {
    fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Store { op_id, request } => {
                    let store = self.store.clone();
                    let done = self.done.clone();
                    tokio::spawn(async move {
                        let result = perform(&store, request).await;
                        let _ = done.send((op_id, result));
                    });
                }
                Effect::Emit(command) => {
                    self.transport.emit(command);
                }
                Effect::Notify(notice) => {
                    let _ = self.notices.send(notice);
                }
            }
        }
    }
}

async fn perform<S: MessageStore>(store: &S, request: StoreRequest) -> Result<StoreReply, SyncError> {
    match request {
        StoreRequest::FetchMessages(event_id) => store.fetch_messages(&event_id).await.map(StoreReply::Messages),
        StoreRequest::FetchUnread(event_id) => store.fetch_unread(&event_id).await.map(StoreReply::Unread),
        StoreRequest::MarkRead(event_id) => store.mark_read(&event_id).await.map(|()| StoreReply::MarkedRead),
        StoreRequest::Create(request) => store.create_message(request).await.map(StoreReply::Created),
        StoreRequest::Delete(id) => store.delete_message(&id).await.map(|()| StoreReply::Deleted),
        StoreRequest::TogglePin(id) => store.toggle_pin(&id).await.map(StoreReply::Pinned),
        StoreRequest::ToggleReaction { message_id, emoji } => store
            .toggle_reaction(&message_id, &emoji)
            .await
            .map(StoreReply::Reactions),
    }
}

/// Arm or cancel the refresh timer. Cancelling twice is a no-op.
fn sync_refresh(timer: &mut Option<Interval>, wanted: bool, period: Duration) {
    match (wanted, timer.is_some()) {
        (true, false) => {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *timer = Some(interval);
            debug!("Refresh timer armed ({:?})", period);
        }
        (false, true) => {
            *timer = None;
            debug!("Refresh timer cancelled");
        }
        _ => {}
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use forum_types::api::CreateMessageRequest;
    use forum_types::models::{Message, Reaction, Role, UnreadSummary};

    use super::*;
    use crate::config::SyncConfig;
    use crate::identity::{Viewer, ViewerRole};
    use crate::notifications::NotificationCenter;
    use crate::reconciler::tests::message;

    /// In-memory store: answers from fixed data and counts calls.
    #[derive(Clone, Default)]
    struct ScriptedStore {
        unread: Arc<Mutex<u32>>,
        calls: Arc<Mutex<Vec<&'static str>>>,
        reject_creates: bool,
    }

    impl ScriptedStore {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn count(&self, call: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
        }
    }

    impl MessageStore for ScriptedStore {
        async fn fetch_messages(&self, _: &EventId) -> Result<Vec<Message>, SyncError> {
            self.record("fetch_messages");
            Ok(vec![message("m1", "u2", "welcome")])
        }

        async fn fetch_unread(&self, _: &EventId) -> Result<UnreadSummary, SyncError> {
            self.record("fetch_unread");
            Ok(UnreadSummary {
                unread_count: *self.unread.lock().unwrap(),
                unread_messages: vec![],
            })
        }

        async fn mark_read(&self, _: &EventId) -> Result<(), SyncError> {
            self.record("mark_read");
            *self.unread.lock().unwrap() = 0;
            Ok(())
        }

        async fn create_message(&self, request: CreateMessageRequest) -> Result<Message, SyncError> {
            self.record("create_message");
            if self.reject_creates {
                return Err(SyncError::WriteRejected("forbidden".into()));
            }
            Ok(message("m2", "u1", &request.content))
        }

        async fn delete_message(&self, _: &MessageId) -> Result<(), SyncError> {
            self.record("delete_message");
            Ok(())
        }

        async fn toggle_pin(&self, _: &MessageId) -> Result<bool, SyncError> {
            self.record("toggle_pin");
            Ok(true)
        }

        async fn toggle_reaction(&self, _: &MessageId, _: &str) -> Result<Vec<Reaction>, SyncError> {
            self.record("toggle_reaction");
            Ok(vec![])
        }
    }

    fn open(store: ScriptedStore, center: &NotificationCenter) -> (RoomHandle, mpsc::UnboundedSender<ForumEvent>) {
        let viewer = Viewer {
            id: "u1".into(),
            name: "Ann".into(),
            role: Role::Participant,
        };
        let room = ForumRoom::new(
            "evt1".into(),
            viewer,
            ViewerRole::Participant,
            center.clone(),
            Duration::from_secs(3),
        );
        let transport = TransportSession::new(&SyncConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_room(room, store, transport, rx, Duration::from_secs(10), || {});
        (handle, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn room_loads_then_polls_while_unfocused() {
        let store = ScriptedStore::default();
        *store.unread.lock().unwrap() = 3;
        let center = NotificationCenter::new();
        let (handle, _pushes) = open(store.clone(), &center);

        let view = handle.wait_for(|v| !v.messages.is_empty() && v.unread.unread_count == 3).await.unwrap();
        assert_eq!(view.messages.len(), 1);

        *store.unread.lock().unwrap() = 5;
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.wait_for(|v| v.unread.unread_count == 5).await.unwrap();
        assert_eq!(center.count(&"evt1".into()), 5);

        handle.focus(true).await.unwrap();
        handle.wait_for(|v| v.unread.unread_count == 0).await.unwrap();

        // Focused and disconnected: only message polling continues
        let unread_fetches = store.count("fetch_unread");
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(store.count("fetch_unread"), unread_fetches);
        assert!(store.count("fetch_messages") >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_send_raises_a_notice() {
        let store = ScriptedStore {
            reject_creates: true,
            ..Default::default()
        };
        let center = NotificationCenter::new();
        let (mut handle, _pushes) = open(store, &center);

        handle.send("hello").await.unwrap();
        let notice = handle.next_notice().await.unwrap();
        assert!(matches!(notice, Notice::SendFailed { ref content, .. } if content == "hello"));
        let view = handle.wait_for(|v| v.messages.pending_count() == 0).await.unwrap();
        assert!(view.messages.messages().all(|m| m.content != "hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn validation_errors_return_to_the_caller() {
        let center = NotificationCenter::new();
        let (handle, _pushes) = open(ScriptedStore::default(), &center);

        assert!(matches!(handle.send("  ").await, Err(SyncError::InvalidRequest(_))));
        assert_eq!(handle.toggle_pin(&"m1".into()).await, Err(SyncError::Unauthorized));
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_update_the_view_and_close_is_idempotent() {
        let center = NotificationCenter::new();
        let (handle, pushes) = open(ScriptedStore::default(), &center);
        handle.wait_for(|v| !v.messages.is_empty()).await.unwrap();

        pushes
            .send(ForumEvent::UserTyping {
                event_id: "evt1".into(),
                user_name: "Bob".into(),
            })
            .unwrap();
        handle.wait_for(|v| v.typing.as_deref() == Some("Bob")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3100)).await;
        handle.wait_for(|v| v.typing.is_none()).await.unwrap();

        handle.close();
        handle.close();
        assert_eq!(handle.focus(true).await, Err(SyncError::RoomClosed));
    }
}
