use crate::models::{MessageRow, NewMessageRow, ReactionRow};
use crate::Database;
use anyhow::Result;
use forum_types::models::Access;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str = "seq, id, event_id, content, author_id, author_name, author_role, \
     parent_id, is_announcement, is_pinned, is_event_organizer, created_at";

impl Database {
    // -- Event access --

    /// Record a viewer's access to an event. `Access::None` revokes it.
    pub fn set_access(&self, event_id: &str, user_id: &str, access: Access) -> Result<()> {
        self.with_conn(|conn| {
            match access {
                Access::None => {
                    conn.execute(
                        "DELETE FROM event_access WHERE event_id = ?1 AND user_id = ?2",
                        (event_id, user_id),
                    )?;
                }
                granted => {
                    conn.execute(
                        "INSERT INTO event_access (event_id, user_id, access) VALUES (?1, ?2, ?3)
                         ON CONFLICT(event_id, user_id) DO UPDATE SET access = excluded.access",
                        (event_id, user_id, granted.as_str()),
                    )?;
                }
            }
            Ok(())
        })
    }

    pub fn get_access(&self, event_id: &str, user_id: &str) -> Result<Access> {
        self.with_conn(|conn| {
            let access: Option<String> = conn
                .query_row(
                    "SELECT access FROM event_access WHERE event_id = ?1 AND user_id = ?2",
                    (event_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(access.as_deref().map_or(Access::None, Access::parse))
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessageRow<'_>) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, event_id, content, author_id, author_name, author_role,
                                       parent_id, is_announcement, is_event_organizer, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    msg.id,
                    msg.event_id,
                    msg.content,
                    msg.author_id,
                    msg.author_name,
                    msg.author_role,
                    msg.parent_id,
                    msg.is_announcement,
                    msg.is_event_organizer,
                    msg.created_at,
                ],
            )?;
            query_message(conn, msg.id)?
                .ok_or_else(|| anyhow::anyhow!("Inserted message vanished: {}", msg.id))
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// All messages of an event, newest first.
    pub fn get_messages(&self, event_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE event_id = ?1 ORDER BY seq DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([event_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Hard delete. Replies and reactions go with it.
    /// Returns false if the message did not exist.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// Flip the pin flag. Returns the new state, or None if the message is gone.
    pub fn toggle_pin(&self, id: &str) -> Result<Option<bool>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_pinned = 1 - is_pinned WHERE id = ?1",
                [id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let pinned: bool =
                conn.query_row("SELECT is_pinned FROM messages WHERE id = ?1", [id], |row| {
                    row.get(0)
                })?;
            Ok(Some(pinned))
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if exists, inserts if not.
    /// Returns true when the reaction was added.
    pub fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        user_name: &str,
        emoji: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                (message_id, user_id, emoji),
            )?;

            let added = if removed == 0 {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, user_name, emoji) VALUES (?1, ?2, ?3, ?4)",
                    (message_id, user_id, user_name, emoji),
                )?;
                true
            } else {
                false
            };

            tx.commit()?;
            Ok(added)
        })
    }

    /// Batch-fetch reactions for a set of message IDs, in insertion order.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, user_name, emoji FROM reactions
                 WHERE message_id IN ({}) ORDER BY id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        user_name: row.get(2)?,
                        emoji: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Read state --

    /// Move the user's read pointer to the newest message of the event.
    /// Calling it again with nothing new is a no-op.
    pub fn mark_read(&self, event_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO read_state (event_id, user_id, last_read_seq)
                 VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) FROM messages WHERE event_id = ?1))
                 ON CONFLICT(event_id, user_id) DO UPDATE SET last_read_seq = excluded.last_read_seq",
                (event_id, user_id),
            )?;
            Ok(())
        })
    }

    /// Unread messages written by others since the read pointer.
    /// Returns the total count and up to `preview_limit` of the most recent
    /// of them, oldest first.
    pub fn get_unread(
        &self,
        event_id: &str,
        user_id: &str,
        preview_limit: u32,
    ) -> Result<(u32, Vec<MessageRow>)> {
        self.with_conn(|conn| {
            let last_read: i64 = conn
                .query_row(
                    "SELECT last_read_seq FROM read_state WHERE event_id = ?1 AND user_id = ?2",
                    (event_id, user_id),
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);

            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE event_id = ?1 AND seq > ?2 AND author_id <> ?3",
                rusqlite::params![event_id, last_read, user_id],
                |row| row.get(0),
            )?;

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE event_id = ?1 AND seq > ?2 AND author_id <> ?3
                 ORDER BY seq DESC LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    rusqlite::params![event_id, last_read, user_id, preview_limit],
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();

            Ok((count, rows))
        })
    }
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let row = conn.query_row(&sql, [id], map_message).optional()?;
    Ok(row)
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        event_id: row.get(2)?,
        content: row.get(3)?,
        author_id: row.get(4)?,
        author_name: row.get(5)?,
        author_role: row.get(6)?,
        parent_id: row.get(7)?,
        is_announcement: row.get(8)?,
        is_pinned: row.get(9)?,
        is_event_organizer: row.get(10)?,
        created_at: row.get(11)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
