//! Client-side message cache with optimistic sends.
//!
//! A send shows up immediately as a `Pending` entry under a `temp-<millis>`
//! id. Two completions then race for it: the store's create response
//! ([`MessageCache::confirm`]) and the room push of the same message
//! ([`MessageCache::merge_push`]). Either may come first; both end with a
//! single `Confirmed` entry under the server id.
//!
//! The list is ordered newest-first by arrival, not by timestamp.
//!
//! Every merge bumps a revision counter. An authoritative fetch remembers
//! the revision it was issued at, so [`MessageCache::load`] keeps whatever
//! arrived while the fetch was in flight.

use std::collections::{HashMap, HashSet};

use forum_types::models::{Message, MessageId, Reaction, UserId};

pub const TEMP_ID_PREFIX: &str = "temp-";

pub fn is_temp_id(id: &MessageId) -> bool {
    id.as_str().starts_with(TEMP_ID_PREFIX)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Shown locally, not yet acknowledged by the store. `id` is a temp id.
    Pending(Message),
    Confirmed(Message),
}

impl Entry {
    pub fn message(&self) -> &Message {
        match self {
            Self::Pending(m) | Self::Confirmed(m) => m,
        }
    }

    fn message_mut(&mut self) -> &mut Message {
        match self {
            Self::Pending(m) | Self::Confirmed(m) => m,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    fn matches_send(&self, content: &str, author_id: &UserId) -> bool {
        match self {
            Self::Pending(m) => m.content == content && &m.author_id == author_id,
            Self::Confirmed(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A message this cache had never seen.
    Inserted,
    /// An existing entry was overwritten with the authoritative copy.
    Updated,
    /// A pending entry was replaced in place by its server copy.
    Reconciled { temp_id: MessageId },
    /// Dropped: the id was deleted earlier.
    Ignored,
}

/// Entries taken out by a delete, kept so the delete can be undone.
#[derive(Debug, Clone, PartialEq)]
pub struct Removed {
    id: MessageId,
    entries: Vec<(usize, Entry)>,
}

impl Removed {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    entries: Vec<Entry>,
    deleted: HashSet<MessageId>,
    last_temp_millis: i64,
    revision: u64,
    /// Revision at which each confirmed entry was last written by a merge.
    stamps: HashMap<MessageId, u64>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(Entry::message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Entry> {
        self.position(id).map(|i| &self.entries[i])
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|e| &e.message().id == id)
    }

    /// Current merge revision. Record it when issuing a fetch and hand it
    /// back to [`load`](Self::load).
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn stamp(&mut self, id: &MessageId) {
        self.revision += 1;
        self.stamps.insert(id.clone(), self.revision);
    }

    /// Insert a speculative message at the front and return its temp id.
    /// `now_millis` seeds the id; ids stay unique within the cache even if
    /// two sends land in the same millisecond.
    pub fn insert_pending(&mut self, mut message: Message, now_millis: i64) -> MessageId {
        let millis = now_millis.max(self.last_temp_millis + 1);
        self.last_temp_millis = millis;

        let temp_id = MessageId::new(format!("{}{}", TEMP_ID_PREFIX, millis));
        message.id = temp_id.clone();
        self.entries.insert(0, Entry::Pending(message));
        temp_id
    }

    /// The store acknowledged the send behind `temp_id`.
    pub fn confirm(&mut self, temp_id: &MessageId, message: Message) -> MergeOutcome {
        let pending = self.position(temp_id).filter(|&i| self.entries[i].is_pending());

        if self.deleted.contains(&message.id) {
            if let Some(i) = pending {
                self.entries.remove(i);
            }
            return MergeOutcome::Ignored;
        }

        self.stamp(&message.id);
        match (pending, self.position(&message.id)) {
            // A push already landed under the server id, possibly by
            // reconciling a different pending entry with the same text.
            (Some(p), Some(_)) => {
                self.entries.remove(p);
                self.overwrite(message);
                MergeOutcome::Updated
            }
            (Some(p), None) => {
                self.entries[p] = Entry::Confirmed(message);
                MergeOutcome::Reconciled {
                    temp_id: temp_id.clone(),
                }
            }
            (None, Some(_)) => {
                self.overwrite(message);
                MergeOutcome::Updated
            }
            (None, None) => {
                self.entries.insert(0, Entry::Confirmed(message));
                MergeOutcome::Inserted
            }
        }
    }

    /// The store declined the send. The speculative entry is dropped; no
    /// other viewer ever saw it.
    pub fn reject(&mut self, temp_id: &MessageId) -> Option<Message> {
        let i = self.position(temp_id).filter(|&i| self.entries[i].is_pending())?;
        match self.entries.remove(i) {
            Entry::Pending(m) | Entry::Confirmed(m) => Some(m),
        }
    }

    /// Apply a `new-message` push.
    pub fn merge_push(&mut self, message: Message) -> MergeOutcome {
        if self.deleted.contains(&message.id) {
            return MergeOutcome::Ignored;
        }

        self.stamp(&message.id);
        if self.position(&message.id).is_some() {
            self.overwrite(message);
            return MergeOutcome::Updated;
        }

        // Oldest pending send with the same text by the same author
        let matched = self
            .entries
            .iter()
            .rposition(|e| e.matches_send(&message.content, &message.author_id));

        match matched {
            Some(i) => {
                let temp_id = self.entries[i].message().id.clone();
                self.entries[i] = Entry::Confirmed(message);
                MergeOutcome::Reconciled { temp_id }
            }
            None => {
                self.entries.insert(0, Entry::Confirmed(message));
                MergeOutcome::Inserted
            }
        }
    }

    fn overwrite(&mut self, message: Message) {
        if let Some(i) = self.position(&message.id) {
            self.entries[i] = Entry::Confirmed(message);
        }
    }

    /// Replace the confirmed entries with an authoritative fetch (newest
    /// first) issued at revision `since`. Pending sends stay at the front
    /// until their own completion arrives. Entries merged after `since` win
    /// over the snapshot, and are kept even when the snapshot predates them.
    pub fn load(&mut self, messages: Vec<Message>, since: u64) {
        let snapshot: HashSet<MessageId> = messages.iter().map(|m| m.id.clone()).collect();

        let mut pending = Vec::new();
        let mut late = HashMap::new();
        let mut newer = Vec::new();
        for entry in self.entries.drain(..) {
            let id = entry.message().id.clone();
            if entry.is_pending() {
                pending.push(entry);
            } else if self.stamps.get(&id).is_some_and(|&r| r > since) {
                if snapshot.contains(&id) {
                    late.insert(id, entry);
                } else {
                    newer.push(entry);
                }
            }
        }

        let mut entries = pending;
        entries.extend(newer);
        entries.extend(
            messages
                .into_iter()
                .filter(|m| !self.deleted.contains(&m.id))
                .map(|m| late.remove(&m.id).unwrap_or(Entry::Confirmed(m))),
        );
        self.entries = entries;

        let live: HashSet<&MessageId> = self.entries.iter().map(|e| &e.message().id).collect();
        self.stamps.retain(|id, _| live.contains(id));
    }

    /// Remove a message and its replies. Later pushes or confirmations for
    /// the id are ignored.
    pub fn apply_delete(&mut self, id: &MessageId) -> Removed {
        self.deleted.insert(id.clone());

        let mut removed = Vec::new();
        let mut index = 0;
        self.entries.retain(|e| {
            let m = e.message();
            let hit = &m.id == id || m.parent_message_id.as_ref() == Some(id);
            if hit {
                removed.push((index, e.clone()));
            }
            index += 1;
            !hit
        });

        Removed {
            id: id.clone(),
            entries: removed,
        }
    }

    /// Undo a failed delete: entries go back where they were.
    pub fn restore(&mut self, removed: Removed) {
        self.deleted.remove(&removed.id);
        for (index, entry) in removed.entries {
            if self.position(&entry.message().id).is_some() {
                continue;
            }
            let at = index.min(self.entries.len());
            self.entries.insert(at, entry);
        }
    }

    pub fn is_deleted(&self, id: &MessageId) -> bool {
        self.deleted.contains(id)
    }

    /// Set the absolute pin state. Returns the previous state, or `None`
    /// if the message is not cached.
    pub fn apply_pin(&mut self, id: &MessageId, is_pinned: bool) -> Option<bool> {
        let i = self.position(id)?;
        self.stamp(id);
        let message = self.entries[i].message_mut();
        Some(std::mem::replace(&mut message.is_pinned, is_pinned))
    }

    /// Replace the full reaction list. Returns the previous list.
    pub fn apply_reactions(&mut self, id: &MessageId, reactions: Vec<Reaction>) -> Option<Vec<Reaction>> {
        let i = self.position(id)?;
        self.stamp(id);
        let message = self.entries[i].message_mut();
        Some(std::mem::replace(&mut message.reactions, reactions))
    }

    /// Flip the pin locally. Returns the state before the flip.
    pub fn toggle_pin_local(&mut self, id: &MessageId) -> Option<bool> {
        let current = self.get(id)?.message().is_pinned;
        self.apply_pin(id, !current)
    }

    /// Add or remove one user's emoji locally. Returns the list before the
    /// toggle.
    pub fn toggle_reaction_local(
        &mut self,
        id: &MessageId,
        emoji: &str,
        user_id: &UserId,
        user_name: &str,
    ) -> Option<Vec<Reaction>> {
        let i = self.position(id)?;
        let message = self.entries[i].message_mut();
        let previous = message.reactions.clone();

        match message
            .reactions
            .iter()
            .position(|r| r.emoji == emoji && &r.user_id == user_id)
        {
            Some(at) => {
                message.reactions.remove(at);
            }
            None => message.reactions.push(Reaction {
                emoji: emoji.to_string(),
                user_id: user_id.clone(),
                user_name: user_name.to_string(),
            }),
        }

        Some(previous)
    }

    pub fn top_level(&self) -> Vec<&Message> {
        self.messages().filter(|m| !m.is_reply()).collect()
    }

    pub fn replies(&self, parent: &MessageId) -> Vec<&Message> {
        self.messages()
            .filter(|m| m.parent_message_id.as_ref() == Some(parent))
            .collect()
    }

    pub fn pinned(&self) -> Vec<&Message> {
        self.messages().filter(|m| m.is_pinned).collect()
    }
}
