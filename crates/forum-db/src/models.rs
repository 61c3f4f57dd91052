/// Database row types, mapped directly from SQLite rows.
/// Distinct from forum-types API models to keep the DB layer independent.

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub event_id: String,
    pub content: String,
    pub author_id: String,
    pub author_name: String,
    pub author_role: String,
    pub parent_id: Option<String>,
    pub is_announcement: bool,
    pub is_pinned: bool,
    pub is_event_organizer: bool,
    pub created_at: String,
}

/// Insert payload; `seq` is assigned by SQLite.
pub struct NewMessageRow<'a> {
    pub id: &'a str,
    pub event_id: &'a str,
    pub content: &'a str,
    pub author_id: &'a str,
    pub author_name: &'a str,
    pub author_role: &'a str,
    pub parent_id: Option<&'a str>,
    pub is_announcement: bool,
    pub is_event_organizer: bool,
    pub created_at: &'a str,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub user_name: String,
    pub emoji: String,
}
