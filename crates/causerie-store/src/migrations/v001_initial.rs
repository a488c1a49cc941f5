//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `threads`, `messages`, `attachments`,
//! and `presence`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Threads (1:1 conversations)
-- ----------------------------------------------------------------
-- user_a < user_b is the canonical order for the unordered pair; the
-- UNIQUE constraint is the backstop against duplicate-thread races.
CREATE TABLE IF NOT EXISTS threads (
    id           TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    user_a       INTEGER NOT NULL,
    user_b       INTEGER NOT NULL,
    created_at   TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    deleted_by_a INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    deleted_at_a TEXT,
    deleted_by_b INTEGER NOT NULL DEFAULT 0,
    deleted_at_b TEXT,

    UNIQUE (user_a, user_b)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    thread_id  TEXT NOT NULL,                -- FK -> threads(id)
    sender_id  INTEGER NOT NULL,
    kind       TEXT NOT NULL,                -- text | image | video | audio | file
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,                -- ISO-8601
    read_at    TEXT,
    is_edited  INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    is_unsent  INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_thread_ts
    ON messages(thread_id, created_at DESC);

-- ----------------------------------------------------------------
-- Media attachments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attachments (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    message_id TEXT NOT NULL,                -- FK -> messages(id)
    url        TEXT NOT NULL,
    kind       TEXT NOT NULL,                -- image | video | audio | file

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);

-- ----------------------------------------------------------------
-- Durable presence state
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS presence (
    user_id   INTEGER PRIMARY KEY NOT NULL,
    is_online INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    last_seen TEXT                           -- NULL while online
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
