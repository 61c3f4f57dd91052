//! Per-room state machine.
//!
//! [`ForumRoom`] never awaits. UI commands and inbound actions go in; state
//! changes happen in place; [`Effect`] descriptions come out for the driver
//! (see [`crate::handle`]) to execute. Store results come back in as
//! [`Action::Completed`], tagged with the op id the effect was issued under.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use forum_types::api::CreateMessageRequest;
use forum_types::events::{ClientCommand, ForumEvent};
use forum_types::models::{EventId, MAX_CONTENT_CHARS, Message, MessageId, Reaction, UnreadSummary};

use crate::error::SyncError;
use crate::identity::{Viewer, ViewerRole};
use crate::notifications::NotificationCenter;
use crate::propagator::{self, Moderation, Settled, Undo};
use crate::reconciler::{MergeOutcome, MessageCache, is_temp_id};
use crate::transport::ConnectionState;
use crate::typing::TypingIndicator;

/// Something the viewer asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send {
        content: String,
        parent_message_id: Option<MessageId>,
        is_announcement: bool,
    },
    Moderate(Moderation),
    Typing,
    StopTyping,
    /// The forum view became visible (`true`) or hidden.
    Focus(bool),
}

/// Something that happened to the room.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Push(ForumEvent),
    Completed {
        op_id: u64,
        result: Result<StoreReply, SyncError>,
    },
    RefreshTick,
    TypingDeadline,
    Transport(ConnectionState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRequest {
    FetchMessages(EventId),
    FetchUnread(EventId),
    MarkRead(EventId),
    Create(CreateMessageRequest),
    Delete(MessageId),
    TogglePin(MessageId),
    ToggleReaction { message_id: MessageId, emoji: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreReply {
    Messages(Vec<Message>),
    Unread(UnreadSummary),
    MarkedRead,
    Created(Message),
    Deleted,
    Pinned(bool),
    Reactions(Vec<Reaction>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Store { op_id: u64, request: StoreRequest },
    Emit(ClientCommand),
    Notify(Notice),
}

/// A failure the user should hear about exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    SendFailed {
        content: String,
        error: SyncError,
    },
    ModerationFailed {
        message_id: MessageId,
        action: &'static str,
        error: SyncError,
    },
}

/// What an outstanding store call was for.
#[derive(Debug)]
enum InFlight {
    /// Carries the cache revision the fetch was issued at.
    FetchMessages { since: u64 },
    FetchUnread,
    MarkRead,
    Send { temp_id: MessageId },
    Moderation { action: Moderation, undo: Undo },
}

/// Snapshot published to the UI after every step.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub event_id: EventId,
    pub role: ViewerRole,
    pub messages: MessageCache,
    pub typing: Option<String>,
    pub unread: UnreadSummary,
    pub focused: bool,
    pub connected: bool,
}

pub struct ForumRoom {
    event_id: EventId,
    viewer: Viewer,
    role: ViewerRole,
    cache: MessageCache,
    typing: TypingIndicator,
    notifications: NotificationCenter,
    focused: bool,
    connected: bool,
    in_flight: HashMap<u64, InFlight>,
    next_op: u64,
}

impl ForumRoom {
    pub fn new(
        event_id: EventId,
        viewer: Viewer,
        role: ViewerRole,
        notifications: NotificationCenter,
        typing_ttl: Duration,
    ) -> Self {
        Self {
            event_id,
            viewer,
            role,
            cache: MessageCache::new(),
            typing: TypingIndicator::new(typing_ttl),
            notifications,
            focused: false,
            connected: false,
            in_flight: HashMap::new(),
            next_op: 0,
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Seed the message list and the unread counter.
    pub fn enter(&mut self, connected: bool) -> Vec<Effect> {
        self.connected = connected;
        self.notifications.init(&self.event_id);
        info!("Entering forum for {} as {:?}", self.event_id, self.role);
        vec![
            self.fetch_messages(),
            self.store(StoreRequest::FetchUnread(self.event_id.clone()), InFlight::FetchUnread),
        ]
    }

    /// The refresh timer runs while the view is hidden, and while the live
    /// channel is down so the message list keeps up by polling.
    pub fn wants_refresh(&self) -> bool {
        !self.focused || !self.connected
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.expires_at()
    }

    pub fn view(&self, now: Instant) -> RoomView {
        RoomView {
            event_id: self.event_id.clone(),
            role: self.role,
            messages: self.cache.clone(),
            typing: self.typing.visible(now).map(str::to_string),
            unread: self.notifications.summary(&self.event_id),
            focused: self.focused,
            connected: self.connected,
        }
    }

    fn store(&mut self, request: StoreRequest, purpose: InFlight) -> Effect {
        self.next_op += 1;
        let op_id = self.next_op;
        self.in_flight.insert(op_id, purpose);
        Effect::Store { op_id, request }
    }

    fn fetch_messages(&mut self) -> Effect {
        let since = self.cache.revision();
        self.store(StoreRequest::FetchMessages(self.event_id.clone()), InFlight::FetchMessages { since })
    }

    fn mark_read(&mut self) -> Effect {
        self.store(StoreRequest::MarkRead(self.event_id.clone()), InFlight::MarkRead)
    }

    /// Validate and apply a viewer command. Errors are returned to the
    /// caller and leave the room unchanged.
    pub fn command(&mut self, command: Command) -> Result<Vec<Effect>, SyncError> {
        match command {
            Command::Send {
                content,
                parent_message_id,
                is_announcement,
            } => self.send(content, parent_message_id, is_announcement),

            Command::Moderate(action) => {
                let undo = propagator::apply_local(&mut self.cache, &action, &self.viewer, self.role)?;
                let request = match &action {
                    Moderation::TogglePin(id) => StoreRequest::TogglePin(id.clone()),
                    Moderation::Delete(id) => StoreRequest::Delete(id.clone()),
                    Moderation::React { message_id, emoji } => StoreRequest::ToggleReaction {
                        message_id: message_id.clone(),
                        emoji: emoji.trim().to_string(),
                    },
                };
                Ok(vec![self.store(request, InFlight::Moderation { action, undo })])
            }

            Command::Typing => Ok(vec![Effect::Emit(ClientCommand::Typing {
                event_id: self.event_id.clone(),
                user_name: self.viewer.name.clone(),
            })]),

            Command::StopTyping => Ok(vec![Effect::Emit(ClientCommand::StopTyping {
                event_id: self.event_id.clone(),
            })]),

            Command::Focus(focused) => {
                if focused == self.focused {
                    return Ok(vec![]);
                }
                self.focused = focused;
                debug!("Forum {} focus: {}", self.event_id, focused);
                Ok(if focused { vec![self.mark_read()] } else { vec![] })
            }
        }
    }

    fn send(
        &mut self,
        content: String,
        parent_message_id: Option<MessageId>,
        is_announcement: bool,
    ) -> Result<Vec<Effect>, SyncError> {
        let length = content.trim().chars().count();
        if length == 0 {
            return Err(SyncError::InvalidRequest("message is empty".into()));
        }
        if length > MAX_CONTENT_CHARS {
            return Err(SyncError::InvalidRequest(format!(
                "message is longer than {} characters",
                MAX_CONTENT_CHARS
            )));
        }
        if is_announcement && !self.role.can_announce() {
            return Err(SyncError::Unauthorized);
        }
        if let Some(parent) = &parent_message_id {
            let top_level = !is_temp_id(parent)
                && self
                    .cache
                    .get(parent)
                    .is_some_and(|e| !e.is_pending() && !e.message().is_reply());
            if !top_level {
                return Err(SyncError::InvalidRequest("replies must target a top-level message".into()));
            }
        }

        let now = Utc::now();
        let speculative = Message {
            id: MessageId::new(""),
            event_id: self.event_id.clone(),
            content: content.clone(),
            author_id: self.viewer.id.clone(),
            author_name: self.viewer.name.clone(),
            author_role: self.viewer.role,
            parent_message_id: parent_message_id.clone(),
            is_announcement,
            is_pinned: false,
            reactions: vec![],
            created_at: now,
            is_event_organizer: self.role == ViewerRole::Organizer,
        };
        let temp_id = self.cache.insert_pending(speculative, now.timestamp_millis());
        debug!("Sending {} in {}", temp_id, self.event_id);

        let request = CreateMessageRequest {
            event_id: self.event_id.clone(),
            content,
            parent_message_id,
            is_announcement,
        };
        Ok(vec![
            self.store(StoreRequest::Create(request), InFlight::Send { temp_id }),
            Effect::Emit(ClientCommand::StopTyping {
                event_id: self.event_id.clone(),
            }),
        ])
    }

    pub fn reduce(&mut self, action: Action, now: Instant) -> Vec<Effect> {
        match action {
            Action::Push(event) => self.push(event, now),
            Action::Completed { op_id, result } => self.complete(op_id, result),

            Action::RefreshTick => {
                let mut effects = Vec::new();
                if !self.focused {
                    effects.push(self.store(StoreRequest::FetchUnread(self.event_id.clone()), InFlight::FetchUnread));
                }
                if !self.connected {
                    effects.push(self.fetch_messages());
                }
                effects
            }

            Action::TypingDeadline => {
                self.typing.expire(now);
                vec![]
            }

            Action::Transport(state) => {
                let was_connected = self.connected;
                self.connected = state == ConnectionState::Connected;
                if was_connected || !self.connected {
                    return vec![];
                }

                // Back online: catch up on whatever the channel missed
                info!("Forum {} reconnected, refetching", self.event_id);
                let mut effects = vec![self.fetch_messages()];
                if !self.focused {
                    effects.push(self.store(StoreRequest::FetchUnread(self.event_id.clone()), InFlight::FetchUnread));
                }
                effects
            }
        }
    }

    fn push(&mut self, event: ForumEvent, now: Instant) -> Vec<Effect> {
        if event.event_id() != &self.event_id {
            warn!("Push for {} routed to room {}", event.event_id(), self.event_id);
            return vec![];
        }

        match event {
            ForumEvent::NewMessage(message) => {
                let foreign = message.author_id != self.viewer.id;
                let preview = foreign.then(|| message.clone());

                let outcome = self.cache.merge_push(message);
                debug!("new-message in {}: {:?}", self.event_id, outcome);

                match (outcome, preview) {
                    (MergeOutcome::Inserted, Some(_)) if self.focused => vec![self.mark_read()],
                    (MergeOutcome::Inserted, Some(message)) => {
                        let count = self.notifications.increment(&self.event_id, &message);
                        debug!("Unread in {} now {}", self.event_id, count);
                        vec![]
                    }
                    _ => vec![],
                }
            }

            ForumEvent::UserTyping { user_name, .. } => {
                if user_name != self.viewer.name {
                    self.typing.show(user_name, now);
                }
                vec![]
            }

            ForumEvent::UserStoppedTyping { .. } => {
                self.typing.stop();
                vec![]
            }

            moderation => {
                if propagator::apply_push(&mut self.cache, &moderation) {
                    debug!("Applied {} in {}", moderation.kind(), self.event_id);
                }
                vec![]
            }
        }
    }

    fn complete(&mut self, op_id: u64, result: Result<StoreReply, SyncError>) -> Vec<Effect> {
        let Some(purpose) = self.in_flight.remove(&op_id) else {
            debug!("Discarding completion for unknown op {}", op_id);
            return vec![];
        };

        match (purpose, result) {
            (InFlight::FetchMessages { since }, Ok(StoreReply::Messages(messages))) => {
                self.cache.load(messages, since);
                vec![]
            }

            (InFlight::FetchUnread, Ok(StoreReply::Unread(summary))) => {
                if self.focused {
                    debug!("Discarding unread summary for focused forum {}", self.event_id);
                } else {
                    self.notifications.set(&self.event_id, summary);
                }
                vec![]
            }

            (InFlight::MarkRead, Ok(StoreReply::MarkedRead)) => {
                self.notifications.clear(&self.event_id);
                vec![]
            }

            (InFlight::Send { temp_id }, Ok(StoreReply::Created(message))) => {
                let outcome = self.cache.confirm(&temp_id, message);
                debug!("Send {} confirmed: {:?}", temp_id, outcome);
                if self.focused { vec![self.mark_read()] } else { vec![] }
            }

            (InFlight::Send { temp_id }, Err(error)) => {
                warn!("Send {} in {} failed: {}", temp_id, self.event_id, error);
                match self.cache.reject(&temp_id) {
                    Some(message) => vec![Effect::Notify(Notice::SendFailed {
                        content: message.content,
                        error,
                    })],
                    None => vec![],
                }
            }

            (InFlight::Moderation { action, undo }, result) => {
                let settled = result.and_then(|reply| match reply {
                    StoreReply::Pinned(is_pinned) => Ok(Settled::Pinned(is_pinned)),
                    StoreReply::Reactions(reactions) => Ok(Settled::Reactions(reactions)),
                    StoreReply::Deleted => Ok(Settled::Deleted),
                    other => Err(SyncError::MalformedPush(format!("unexpected reply {:?}", other))),
                });
                match propagator::settle(&mut self.cache, undo, settled) {
                    Ok(()) => vec![],
                    Err(error) => vec![Effect::Notify(Notice::ModerationFailed {
                        message_id: action.message_id().clone(),
                        action: action.label(),
                        error,
                    })],
                }
            }

            (_, Err(error)) => {
                // Reads and mark-read are retried by the next refresh or focus
                warn!("Store call {} for {} failed: {}", op_id, self.event_id, error);
                vec![]
            }

            (_, Ok(reply)) => {
                warn!("Mismatched store reply for op {}: {:?}", op_id, reply);
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use forum_types::models::Role;

    use super::*;
    use crate::reconciler::tests::message;

    const TTL: Duration = Duration::from_millis(3000);

    fn viewer(id: &str) -> Viewer {
        Viewer {
            id: id.into(),
            name: id.to_uppercase(),
            role: Role::Participant,
        }
    }

    fn room(viewer_id: &str, role: ViewerRole, center: &NotificationCenter) -> ForumRoom {
        let mut room = ForumRoom::new("evt1".into(), viewer(viewer_id), role, center.clone(), TTL);
        room.enter(true);
        room
    }

    fn op_for(effects: &[Effect], pred: impl Fn(&StoreRequest) -> bool) -> u64 {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::Store { op_id, request } if pred(request) => Some(*op_id),
                _ => None,
            })
            .expect("no matching store effect")
    }

    fn push(room: &mut ForumRoom, m: Message) -> Vec<Effect> {
        room.reduce(Action::Push(ForumEvent::NewMessage(m)), Instant::now())
    }

    fn evt() -> EventId {
        EventId::from("evt1")
    }

    #[test]
    fn enter_fetches_messages_and_unread() {
        let center = NotificationCenter::new();
        let mut r = ForumRoom::new(evt(), viewer("u1"), ViewerRole::Participant, center, TTL);
        let effects = r.enter(true);
        op_for(&effects, |q| matches!(q, StoreRequest::FetchMessages(_)));
        op_for(&effects, |q| matches!(q, StoreRequest::FetchUnread(_)));
        assert!(r.wants_refresh());
    }

    #[test]
    fn push_during_initial_fetch_survives_the_snapshot() {
        let center = NotificationCenter::new();
        let mut r = ForumRoom::new(evt(), viewer("u1"), ViewerRole::Participant, center, TTL);
        let effects = r.enter(true);
        let fetch = op_for(&effects, |q| matches!(q, StoreRequest::FetchMessages(_)));
        r.command(Command::Focus(true)).unwrap();

        push(&mut r, message("m2", "u2", "fresh"));
        r.reduce(
            Action::Completed {
                op_id: fetch,
                result: Ok(StoreReply::Messages(vec![message("m1", "u2", "old")])),
            },
            Instant::now(),
        );

        let ids: Vec<_> = r.cache().messages().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m2", "m1"]);
        assert!(!r.wants_refresh());
    }

    #[test]
    fn reconnect_refetch_keeps_pushes_that_raced_it() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        r.reduce(Action::Transport(ConnectionState::Disconnected), Instant::now());
        let effects = r.reduce(Action::Transport(ConnectionState::Connected), Instant::now());
        let fetch = op_for(&effects, |q| matches!(q, StoreRequest::FetchMessages(_)));

        push(&mut r, message("m3", "u2", "live"));
        r.reduce(
            Action::Completed {
                op_id: fetch,
                result: Ok(StoreReply::Messages(vec![message("m1", "u2", "old")])),
            },
            Instant::now(),
        );

        assert!(r.cache().get(&"m3".into()).is_some());
        assert!(r.cache().get(&"m1".into()).is_some());
    }

    #[test]
    fn unread_counts_foreign_pushes_only_while_unfocused() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);

        push(&mut r, message("m1", "u2", "one"));
        assert_eq!(center.count(&evt()), 1);
        push(&mut r, message("m2", "u3", "two"));
        assert_eq!(center.count(&evt()), 2);

        // Own message and a duplicate delivery leave the count alone
        push(&mut r, message("m3", "u1", "mine"));
        push(&mut r, message("m2", "u3", "two"));
        assert_eq!(center.count(&evt()), 2);
    }

    #[test]
    fn focusing_marks_read_and_clears_on_success_only() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        push(&mut r, message("m1", "u2", "one"));

        let effects = r.command(Command::Focus(true)).unwrap();
        let op = op_for(&effects, |q| matches!(q, StoreRequest::MarkRead(_)));
        r.reduce(
            Action::Completed {
                op_id: op,
                result: Err(SyncError::TransportUnavailable),
            },
            Instant::now(),
        );
        assert_eq!(center.count(&evt()), 1);

        r.command(Command::Focus(false)).unwrap();
        let effects = r.command(Command::Focus(true)).unwrap();
        let op = op_for(&effects, |q| matches!(q, StoreRequest::MarkRead(_)));
        r.reduce(
            Action::Completed {
                op_id: op,
                result: Ok(StoreReply::MarkedRead),
            },
            Instant::now(),
        );
        assert_eq!(center.count(&evt()), 0);
    }

    #[test]
    fn mark_read_at_zero_is_a_no_op() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);

        for _ in 0..2 {
            let effects = r.command(Command::Focus(true)).unwrap();
            let op = op_for(&effects, |q| matches!(q, StoreRequest::MarkRead(_)));
            let after = r.reduce(
                Action::Completed {
                    op_id: op,
                    result: Ok(StoreReply::MarkedRead),
                },
                Instant::now(),
            );
            assert!(after.is_empty());
            assert_eq!(center.count(&evt()), 0);
            r.command(Command::Focus(false)).unwrap();
        }
    }

    #[test]
    fn offline_refresh_sets_count_from_store() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        for i in 0..5 {
            push(&mut r, message(&format!("m{}", i), "u2", "stale"));
        }
        r.reduce(Action::Transport(ConnectionState::Disconnected), Instant::now());

        // Two refresh cycles while offline; the second one answers
        r.reduce(Action::RefreshTick, Instant::now());
        let effects = r.reduce(Action::RefreshTick, Instant::now());
        op_for(&effects, |q| matches!(q, StoreRequest::FetchMessages(_)));
        let op = op_for(&effects, |q| matches!(q, StoreRequest::FetchUnread(_)));

        r.reduce(
            Action::Completed {
                op_id: op,
                result: Ok(StoreReply::Unread(UnreadSummary {
                    unread_count: 2,
                    unread_messages: vec![],
                })),
            },
            Instant::now(),
        );
        assert_eq!(center.count(&evt()), 2);
    }

    #[test]
    fn reconnect_refetches() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        assert!(r.reduce(Action::Transport(ConnectionState::Connected), Instant::now()).is_empty());

        r.reduce(Action::Transport(ConnectionState::Disconnected), Instant::now());
        assert!(r.wants_refresh());
        let effects = r.reduce(Action::Transport(ConnectionState::Connected), Instant::now());
        op_for(&effects, |q| matches!(q, StoreRequest::FetchMessages(_)));
        op_for(&effects, |q| matches!(q, StoreRequest::FetchUnread(_)));
    }

    #[test]
    fn focused_rooms_ignore_fetched_summaries() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        let effects = r.reduce(Action::RefreshTick, Instant::now());
        let op = op_for(&effects, |q| matches!(q, StoreRequest::FetchUnread(_)));

        r.command(Command::Focus(true)).unwrap();
        r.reduce(
            Action::Completed {
                op_id: op,
                result: Ok(StoreReply::Unread(UnreadSummary {
                    unread_count: 7,
                    unread_messages: vec![],
                })),
            },
            Instant::now(),
        );
        assert_eq!(center.count(&evt()), 0);
        assert!(!r.wants_refresh());
    }

    #[test]
    fn send_then_push_converges_to_one_entry() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);

        let effects = r
            .command(Command::Send {
                content: "hello".into(),
                parent_message_id: None,
                is_announcement: false,
            })
            .unwrap();
        assert!(effects.contains(&Effect::Emit(ClientCommand::StopTyping { event_id: evt() })));
        let op = op_for(&effects, |q| matches!(q, StoreRequest::Create(_)));
        assert_eq!(r.cache().pending_count(), 1);

        r.reduce(
            Action::Completed {
                op_id: op,
                result: Ok(StoreReply::Created(message("msg_abc123", "u1", "hello"))),
            },
            Instant::now(),
        );
        push(&mut r, message("msg_abc123", "u1", "hello"));

        let ids: Vec<_> = r.cache().messages().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["msg_abc123"]);
        assert_eq!(center.count(&evt()), 0);
    }

    #[test]
    fn failed_send_is_removed_and_reported_once() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        let effects = r
            .command(Command::Send {
                content: "hello".into(),
                parent_message_id: None,
                is_announcement: false,
            })
            .unwrap();
        let op = op_for(&effects, |q| matches!(q, StoreRequest::Create(_)));

        let completion = Action::Completed {
            op_id: op,
            result: Err(SyncError::WriteRejected("forbidden".into())),
        };
        let effects = r.reduce(completion.clone(), Instant::now());
        assert_eq!(
            effects,
            vec![Effect::Notify(Notice::SendFailed {
                content: "hello".into(),
                error: SyncError::WriteRejected("forbidden".into()),
            })]
        );
        assert!(r.cache().is_empty());
        assert!(r.reduce(completion, Instant::now()).is_empty());
    }

    #[test]
    fn send_lost_to_the_network_is_still_reported() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        let effects = r
            .command(Command::Send {
                content: "offline".into(),
                parent_message_id: None,
                is_announcement: false,
            })
            .unwrap();
        let op = op_for(&effects, |q| matches!(q, StoreRequest::Create(_)));

        let effects = r.reduce(
            Action::Completed {
                op_id: op,
                result: Err(SyncError::TransportUnavailable),
            },
            Instant::now(),
        );
        assert!(matches!(
            effects.as_slice(),
            [Effect::Notify(Notice::SendFailed { error: SyncError::TransportUnavailable, .. })]
        ));
    }

    #[test]
    fn invalid_sends_are_refused_up_front() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        let send = |content: String, parent: Option<&str>, is_announcement| Command::Send {
            content,
            parent_message_id: parent.map(Into::into),
            is_announcement,
        };

        assert!(matches!(r.command(send("   ".into(), None, false)), Err(SyncError::InvalidRequest(_))));
        assert!(matches!(
            r.command(send("x".repeat(MAX_CONTENT_CHARS + 1), None, false)),
            Err(SyncError::InvalidRequest(_))
        ));
        assert_eq!(r.command(send("hi".into(), None, true)), Err(SyncError::Unauthorized));
        assert!(matches!(
            r.command(send("hi".into(), Some("missing"), false)),
            Err(SyncError::InvalidRequest(_))
        ));
        assert!(r.cache().is_empty());
    }

    #[test]
    fn organizer_pin_reaches_other_viewers() {
        let center_a = NotificationCenter::new();
        let center_b = NotificationCenter::new();
        let mut a = room("org", ViewerRole::Organizer, &center_a);
        let mut b = room("u2", ViewerRole::Participant, &center_b);
        push(&mut a, message("M", "u2", "hi"));
        push(&mut b, message("M", "u2", "hi"));

        let effects = a.command(Command::Moderate(Moderation::TogglePin("M".into()))).unwrap();
        op_for(&effects, |q| matches!(q, StoreRequest::TogglePin(_)));

        let pushed = ForumEvent::MessagePinned {
            event_id: evt(),
            message_id: "M".into(),
            is_pinned: true,
        };
        a.reduce(Action::Push(pushed.clone()), Instant::now());
        b.reduce(Action::Push(pushed), Instant::now());

        assert!(a.cache().get(&"M".into()).unwrap().message().is_pinned);
        assert!(b.cache().get(&"M".into()).unwrap().message().is_pinned);
    }

    #[test]
    fn failed_moderation_reverts_with_notice() {
        let center = NotificationCenter::new();
        let mut r = room("org", ViewerRole::Organizer, &center);
        push(&mut r, message("M", "u2", "hi"));

        let effects = r.command(Command::Moderate(Moderation::Delete("M".into()))).unwrap();
        let op = op_for(&effects, |q| matches!(q, StoreRequest::Delete(_)));
        assert!(r.cache().is_empty());

        let effects = r.reduce(
            Action::Completed {
                op_id: op,
                result: Err(SyncError::Unauthorized),
            },
            Instant::now(),
        );
        assert!(matches!(
            effects.as_slice(),
            [Effect::Notify(Notice::ModerationFailed { action: "delete", .. })]
        ));
        assert_eq!(r.cache().len(), 1);
    }

    #[test]
    fn typing_expires_after_ttl() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        let t0 = Instant::now();

        r.reduce(
            Action::Push(ForumEvent::UserTyping {
                event_id: evt(),
                user_name: "Alice".into(),
            }),
            t0,
        );
        assert_eq!(r.view(t0).typing.as_deref(), Some("Alice"));
        assert_eq!(r.typing_deadline(), Some(t0 + TTL));

        let later = t0 + Duration::from_millis(3100);
        r.reduce(Action::TypingDeadline, later);
        assert_eq!(r.view(later).typing, None);
        assert_eq!(r.typing_deadline(), None);
    }

    #[test]
    fn pushes_for_other_events_are_ignored() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        let mut other = message("x1", "u2", "elsewhere");
        other.event_id = "evt2".into();

        push(&mut r, other);
        assert!(r.cache().is_empty());
        assert_eq!(center.count(&"evt2".into()), 0);
        assert_eq!(center.count(&evt()), 0);
    }

    #[test]
    fn completions_after_restart_are_discarded() {
        let center = NotificationCenter::new();
        let mut r = room("u1", ViewerRole::Participant, &center);
        let effects = r.reduce(
            Action::Completed {
                op_id: 999,
                result: Ok(StoreReply::Unread(UnreadSummary {
                    unread_count: 4,
                    unread_messages: vec![],
                })),
            },
            Instant::now(),
        );
        assert!(effects.is_empty());
        assert_eq!(center.count(&evt()), 0);
    }
}
