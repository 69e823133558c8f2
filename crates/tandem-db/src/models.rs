//! Row mapping between SQLite columns and the shared domain models.
//! Ids are stored as hyphenated TEXT, timestamps as INTEGER microseconds.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use tandem_types::models::{Chat, LastMessage, Message, User};

pub const USER_COLUMNS: &str =
    "id, email, display_name, avatar, is_verified, is_online, last_seen, created_at";

pub const CHAT_COLUMNS: &str =
    "id, user_a, user_b, last_content, last_sender_id, last_created_at, created_at, updated_at";

pub const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, seen, seen_at, created_at";

pub fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => time_at(row, idx).map(Some),
        None => Ok(None),
    }
}

pub fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        avatar: row.get(3)?,
        is_verified: row.get(4)?,
        is_online: row.get(5)?,
        last_seen: time_at(row, 6)?,
        created_at: time_at(row, 7)?,
    })
}

pub fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    // The snapshot is either fully present or absent.
    let last_message = match row.get::<_, Option<String>>(3)? {
        Some(content) => Some(LastMessage {
            content,
            sender_id: uuid_at(row, 4)?,
            created_at: time_at(row, 5)?,
        }),
        None => None,
    };

    Ok(Chat {
        id: uuid_at(row, 0)?,
        participants: [uuid_at(row, 1)?, uuid_at(row, 2)?],
        last_message,
        created_at: time_at(row, 6)?,
        updated_at: time_at(row, 7)?,
    })
}

pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        chat_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        content: row.get(3)?,
        seen: row.get(4)?,
        seen_at: opt_time_at(row, 5)?,
        created_at: time_at(row, 6)?,
    })
}
