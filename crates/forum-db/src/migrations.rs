use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Who may use an event's forum. Filled by the registration service.
        CREATE TABLE IF NOT EXISTS event_access (
            event_id    TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            access      TEXT NOT NULL CHECK (access IN ('organizer', 'registered')),
            PRIMARY KEY (event_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
            id                  TEXT NOT NULL UNIQUE,
            event_id            TEXT NOT NULL,
            content             TEXT NOT NULL,
            author_id           TEXT NOT NULL,
            author_name         TEXT NOT NULL,
            author_role         TEXT NOT NULL,
            parent_id           TEXT REFERENCES messages(id) ON DELETE CASCADE,
            is_announcement     INTEGER NOT NULL DEFAULT 0,
            is_pinned           INTEGER NOT NULL DEFAULT 0,
            is_event_organizer  INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_event
            ON messages(event_id, seq);

        CREATE TABLE IF NOT EXISTS reactions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            user_name   TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        -- Read pointer: highest message seq the user has seen per event
        CREATE TABLE IF NOT EXISTS read_state (
            event_id        TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            last_read_seq   INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (event_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
