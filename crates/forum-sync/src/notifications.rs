//! Process-wide unread counters, keyed by event.
//!
//! Every open room and every screen that shows a badge shares one
//! [`NotificationCenter`]. All operations take the event id, so one
//! event's counter never leaks into another's.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use forum_types::models::{EventId, Message, UnreadPreview, UnreadSummary};

/// Preview snippets are cut to this many characters, then `...` is added.
pub const PREVIEW_CHARS: usize = 50;

/// Only the most recent previews are kept.
pub const MAX_PREVIEWS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct NotificationCenter {
    inner: Arc<Mutex<HashMap<EventId, UnreadSummary>>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventId, UnreadSummary>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tracking an event with an empty counter. Existing state is kept.
    pub fn init(&self, event_id: &EventId) {
        self.lock().entry(event_id.clone()).or_default();
    }

    /// Replace the event's state with an authoritative summary.
    pub fn set(&self, event_id: &EventId, summary: UnreadSummary) {
        let mut previews: Vec<UnreadPreview> = summary
            .unread_messages
            .into_iter()
            .map(|p| UnreadPreview {
                content: snippet(&p.content),
                ..p
            })
            .collect();
        if previews.len() > MAX_PREVIEWS {
            previews.drain(..previews.len() - MAX_PREVIEWS);
        }

        self.lock().insert(
            event_id.clone(),
            UnreadSummary {
                unread_count: summary.unread_count,
                unread_messages: previews,
            },
        );
    }

    /// Count one live message and remember its preview.
    pub fn increment(&self, event_id: &EventId, message: &Message) -> u32 {
        let mut map = self.lock();
        let state = map.entry(event_id.clone()).or_default();

        state.unread_count += 1;
        state.unread_messages.push(UnreadPreview {
            author_name: message.author_name.clone(),
            author_role: message.author_role,
            content: snippet(&message.content),
        });
        if state.unread_messages.len() > MAX_PREVIEWS {
            state.unread_messages.remove(0);
        }

        state.unread_count
    }

    /// Zero the counter after a successful mark-read. No-op when already zero.
    pub fn clear(&self, event_id: &EventId) {
        if let Some(state) = self.lock().get_mut(event_id) {
            state.unread_count = 0;
            state.unread_messages.clear();
        }
    }

    /// Stop tracking an event.
    pub fn remove(&self, event_id: &EventId) {
        self.lock().remove(event_id);
    }

    pub fn count(&self, event_id: &EventId) -> u32 {
        self.lock().get(event_id).map_or(0, |s| s.unread_count)
    }

    pub fn previews(&self, event_id: &EventId) -> Vec<UnreadPreview> {
        self.lock()
            .get(event_id)
            .map(|s| s.unread_messages.clone())
            .unwrap_or_default()
    }

    pub fn summary(&self, event_id: &EventId) -> UnreadSummary {
        self.lock().get(event_id).cloned().unwrap_or_default()
    }

    /// Sum over every tracked event.
    pub fn total(&self) -> u32 {
        self.lock().values().map(|s| s.unread_count).sum()
    }

    /// Tooltip for one event's badge, `None` when nothing is unread.
    pub fn tooltip(&self, event_id: &EventId) -> Option<String> {
        let state = self.summary(event_id);
        (state.unread_count > 0).then(|| tooltip_lines(&state).join("\n"))
    }

    /// Tooltip for the global badge: one block per event with unread messages.
    pub fn total_tooltip(&self) -> Option<String> {
        let map = self.lock();
        let mut events: Vec<_> = map.iter().filter(|(_, s)| s.unread_count > 0).collect();
        if events.is_empty() {
            return None;
        }
        events.sort_by(|a, b| a.0.cmp(b.0));

        let lines: Vec<String> = events.into_iter().flat_map(|(_, s)| tooltip_lines(s)).collect();
        Some(lines.join("\n"))
    }
}

fn tooltip_lines(state: &UnreadSummary) -> Vec<String> {
    if state.unread_messages.is_empty() {
        return vec![count_label(state.unread_count)];
    }
    state
        .unread_messages
        .iter()
        .map(|p| format!("{} ({}): {}", p.author_name, p.author_role, p.content))
        .collect()
}

pub fn count_label(count: u32) -> String {
    if count == 1 {
        "1 unread message".to_string()
    } else {
        format!("{} unread messages", count)
    }
}

/// First [`PREVIEW_CHARS`] characters, with `...` when cut.
pub fn snippet(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
