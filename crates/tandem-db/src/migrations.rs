use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Timestamps are stored as INTEGER microseconds since the Unix epoch so
/// ordering and strictly-before cursors are exact.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            email         TEXT NOT NULL UNIQUE,
            display_name  TEXT,
            avatar        TEXT NOT NULL DEFAULT '',
            is_verified   INTEGER NOT NULL DEFAULT 0,
            is_online     INTEGER NOT NULL DEFAULT 0,
            last_seen     INTEGER NOT NULL,
            created_at    INTEGER NOT NULL
        );

        -- One row per unordered pair: user_a is always the smaller id.
        CREATE TABLE IF NOT EXISTS chats (
            id               TEXT PRIMARY KEY,
            user_a           TEXT NOT NULL REFERENCES users(id),
            user_b           TEXT NOT NULL REFERENCES users(id),
            last_content     TEXT,
            last_sender_id   TEXT,
            last_created_at  INTEGER,
            created_at       INTEGER NOT NULL,
            updated_at       INTEGER NOT NULL,
            CHECK (user_a < user_b),
            UNIQUE (user_a, user_b)
        );

        CREATE INDEX IF NOT EXISTS idx_chats_user_b ON chats(user_b);
        CREATE INDEX IF NOT EXISTS idx_chats_updated ON chats(updated_at);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            chat_id     TEXT NOT NULL REFERENCES chats(id),
            sender_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            seen        INTEGER NOT NULL DEFAULT 0,
            seen_at     INTEGER,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
