use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use tandem_types::models::{Chat, LastMessage, Message, User};

use crate::Database;
use crate::models::{
    CHAT_COLUMNS, MESSAGE_COLUMNS, USER_COLUMNS, chat_from_row, message_from_row, to_micros,
    user_from_row,
};
use crate::store::ChatStore;

impl ChatStore for Database {
    // -- Users --

    fn create_user(&self, email: &str, display_name: Option<&str>, verified: bool) -> Result<User> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            bail!("email is required");
        }

        let id = Uuid::new_v4();
        let now = to_micros(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, display_name, is_verified, last_seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id.to_string(), email, display_name, verified, now],
            )?;
            Ok(())
        })?;

        self.get_user(id)?
            .ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", id))
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
            let user = conn
                .query_row(&sql, [id.to_string()], user_from_row)
                .optional()?;
            Ok(user)
        })
    }

    fn list_users(&self, exclude: Uuid, search: Option<&str>, limit: u32) -> Result<Vec<User>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.to_lowercase()));

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE is_verified = 1
                   AND id != ?1
                   AND (?2 IS NULL OR email LIKE ?2 OR display_name LIKE ?2)
                 ORDER BY email
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map(params![exclude.to_string(), pattern, limit], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    fn update_profile(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Option<User>> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users
                 SET display_name = COALESCE(?2, display_name),
                     avatar = COALESCE(?3, avatar)
                 WHERE id = ?1",
                params![id.to_string(), display_name, avatar],
            )?;
            Ok(n)
        })?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_user(id)
    }

    fn set_presence(&self, id: Uuid, online: bool, last_seen: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
                params![id.to_string(), online, to_micros(last_seen)],
            )?;
            Ok(())
        })
    }

    fn reset_presence(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("UPDATE users SET is_online = 0 WHERE is_online = 1", [])?;
            Ok(n)
        })
    }

    // -- Chats --

    fn get_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1");
            let chat = conn
                .query_row(&sql, [id.to_string()], chat_from_row)
                .optional()?;
            Ok(chat)
        })
    }

    fn find_or_create_chat(&self, a: Uuid, b: Uuid) -> Result<Chat> {
        if a == b {
            bail!("a chat needs two distinct participants");
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let now = to_micros(Utc::now());

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO chats (id, user_a, user_b, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![Uuid::new_v4().to_string(), lo.to_string(), hi.to_string(), now],
            )?;
            let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE user_a = ?1 AND user_b = ?2");
            let chat = tx.query_row(&sql, [lo.to_string(), hi.to_string()], chat_from_row)?;
            tx.commit()?;
            Ok(chat)
        })
    }

    fn list_chats(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHAT_COLUMNS} FROM chats
                 WHERE user_a = ?1 OR user_b = ?1
                 ORDER BY updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let chats = stmt
                .query_map([user_id.to_string()], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(chats)
        })
    }

    fn update_last_message(&self, chat_id: Uuid, snapshot: &LastMessage) -> Result<()> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE chats
                 SET last_content = ?2, last_sender_id = ?3, last_created_at = ?4, updated_at = ?4
                 WHERE id = ?1",
                params![
                    chat_id.to_string(),
                    snapshot.content,
                    snapshot.sender_id.to_string(),
                    to_micros(snapshot.created_at),
                ],
            )?;
            Ok(n)
        })?;

        if changed == 0 {
            bail!("chat {} not found", chat_id);
        }
        Ok(())
    }

    // -- Messages --

    fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, content, seen, seen_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id.to_string(),
                    message.chat_id.to_string(),
                    message.sender_id.to_string(),
                    message.content,
                    message.seen,
                    message.seen_at.map(to_micros),
                    to_micros(message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn latest_message_at(&self, chat_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let micros: Option<i64> = self.with_conn(|conn| {
            let v = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE chat_id = ?1",
                [chat_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(v)
        })?;

        Ok(micros.and_then(DateTime::from_timestamp_micros))
    }

    fn list_messages(
        &self,
        chat_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut rows = self.with_conn(|conn| {
            // Newest first so LIMIT keeps the page adjacent to the cursor.
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![chat_id.to_string(), before.map(to_micros), limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.reverse();
        Ok(rows)
    }

    fn list_messages_after(
        &self,
        chat_id: Uuid,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1 AND created_at > ?2
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![chat_id.to_string(), to_micros(after), limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn mark_seen(&self, chat_id: Uuid, reader: Uuid, at: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET seen = 1, seen_at = ?3
                 WHERE chat_id = ?1 AND sender_id != ?2 AND seen = 0",
                params![chat_id.to_string(), reader.to_string(), to_micros(at)],
            )?;
            Ok(n)
        })
    }

    fn unread_count(&self, chat_id: Uuid, user_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1 AND sender_id != ?2 AND seen = 0",
                [chat_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn message(chat_id: Uuid, sender_id: Uuid, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            content: content.to_string(),
            seen: false,
            seen_at: None,
            created_at: at,
        }
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap()
    }

    #[test]
    fn find_or_create_is_order_independent() {
        let db = db();
        let a = db.create_user("a@example.com", None, true).unwrap();
        let b = db.create_user("b@example.com", None, true).unwrap();

        let first = db.find_or_create_chat(a.id, b.id).unwrap();
        let second = db.find_or_create_chat(b.id, a.id).unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.has_participant(a.id) && first.has_participant(b.id));
        assert_eq!(db.list_chats(a.id).unwrap().len(), 1);
        assert!(db.find_or_create_chat(a.id, a.id).is_err());
    }

    #[test]
    fn paging_backward_reconstructs_history() {
        let db = db();
        let a = db.create_user("a@example.com", None, true).unwrap();
        let b = db.create_user("b@example.com", None, true).unwrap();
        let chat = db.find_or_create_chat(a.id, b.id).unwrap();

        for i in 0..7 {
            let sender = if i % 2 == 0 { a.id } else { b.id };
            let m = message(chat.id, sender, &format!("m{i}"), base_time() + Duration::seconds(i));
            db.insert_message(&m).unwrap();
        }

        let all = db.list_messages(chat.id, None, 100).unwrap();
        assert_eq!(all.len(), 7);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let mut paged: Vec<Message> = Vec::new();
        let mut before = None;
        loop {
            let page = db.list_messages(chat.id, before, 3).unwrap();
            let done = page.len() < 3;
            before = page.first().map(|m| m.created_at);
            let mut merged = page;
            merged.extend(paged);
            paged = merged;
            if done {
                break;
            }
        }
        assert_eq!(paged, all);

        let after = db.list_messages_after(chat.id, all[4].created_at, 10).unwrap();
        assert_eq!(after, all[5..].to_vec());
        assert_eq!(db.latest_message_at(chat.id).unwrap(), Some(all[6].created_at));
    }

    #[test]
    fn mark_seen_skips_own_messages_and_is_idempotent() {
        let db = db();
        let a = db.create_user("a@example.com", None, true).unwrap();
        let b = db.create_user("b@example.com", None, true).unwrap();
        let chat = db.find_or_create_chat(a.id, b.id).unwrap();

        assert_eq!(db.mark_seen(chat.id, b.id, Utc::now()).unwrap(), 0);

        db.insert_message(&message(chat.id, a.id, "one", base_time())).unwrap();
        db.insert_message(&message(chat.id, a.id, "two", base_time() + Duration::seconds(1)))
            .unwrap();
        db.insert_message(&message(chat.id, b.id, "three", base_time() + Duration::seconds(2)))
            .unwrap();

        assert_eq!(db.unread_count(chat.id, b.id).unwrap(), 2);
        assert_eq!(db.unread_count(chat.id, a.id).unwrap(), 1);

        assert_eq!(db.mark_seen(chat.id, b.id, Utc::now()).unwrap(), 2);
        assert_eq!(db.mark_seen(chat.id, b.id, Utc::now()).unwrap(), 0);
        assert_eq!(db.unread_count(chat.id, b.id).unwrap(), 0);

        let messages = db.list_messages(chat.id, None, 10).unwrap();
        assert!(messages[0].seen && messages[0].seen_at.is_some());
        assert!(!messages[2].seen && messages[2].seen_at.is_none());
    }

    #[test]
    fn snapshot_update_reorders_chat_list() {
        let db = db();
        let a = db.create_user("a@example.com", None, true).unwrap();
        let b = db.create_user("b@example.com", None, true).unwrap();
        let c = db.create_user("c@example.com", None, true).unwrap();
        let ab = db.find_or_create_chat(a.id, b.id).unwrap();
        let ac = db.find_or_create_chat(a.id, c.id).unwrap();

        let snapshot = LastMessage {
            content: "hi".into(),
            sender_id: b.id,
            created_at: Utc::now() + Duration::minutes(1),
        };
        db.update_last_message(ab.id, &snapshot).unwrap();

        let chats = db.list_chats(a.id).unwrap();
        assert_eq!(chats[0].id, ab.id);
        assert_eq!(chats[0].last_message.as_ref(), Some(&snapshot));
        assert_eq!(chats[1].id, ac.id);
        assert!(chats[1].last_message.is_none());

        assert!(db.update_last_message(Uuid::new_v4(), &snapshot).is_err());
    }

    #[test]
    fn presence_and_profile_updates() {
        let db = db();
        let a = db.create_user("  Alice@Example.com ", None, true).unwrap();
        assert_eq!(a.email, "alice@example.com");
        assert!(!a.is_online);

        let at = base_time();
        db.set_presence(a.id, true, at).unwrap();
        let reloaded = db.get_user(a.id).unwrap().unwrap();
        assert!(reloaded.is_online);
        assert_eq!(reloaded.last_seen, at);

        assert_eq!(db.reset_presence().unwrap(), 1);
        assert!(!db.get_user(a.id).unwrap().unwrap().is_online);

        let updated = db.update_profile(a.id, Some("Al"), None).unwrap().unwrap();
        assert_eq!(updated.name(), "Al");
        assert!(db.update_profile(Uuid::new_v4(), Some("x"), None).unwrap().is_none());
    }

    #[test]
    fn list_users_filters_unverified_and_self() {
        let db = db();
        let a = db.create_user("alice@example.com", None, true).unwrap();
        db.create_user("bob@example.com", Some("Bobby"), true).unwrap();
        db.create_user("carol@example.com", None, false).unwrap();

        let all = db.list_users(a.id, None, 50).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].email, "bob@example.com");

        assert_eq!(db.list_users(a.id, Some("BOBB"), 50).unwrap().len(), 1);
        assert!(db.list_users(a.id, Some("carol"), 50).unwrap().is_empty());
    }
}
