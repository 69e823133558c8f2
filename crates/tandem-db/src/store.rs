use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tandem_types::models::{Chat, LastMessage, Message, User};

/// The durable store collaborator. Every method is atomic at the single-row
/// level and blocking; async callers must run it off the runtime.
pub trait ChatStore: Send + Sync + 'static {
    // -- Users --

    fn create_user(&self, email: &str, display_name: Option<&str>, verified: bool) -> Result<User>;

    fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    /// Verified users other than `exclude`, optionally filtered by a
    /// case-insensitive substring of email or display name.
    fn list_users(&self, exclude: Uuid, search: Option<&str>, limit: u32) -> Result<Vec<User>>;

    fn update_profile(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Option<User>>;

    fn set_presence(&self, id: Uuid, online: bool, last_seen: DateTime<Utc>) -> Result<()>;

    /// Clear every online flag. Returns how many users were flipped.
    fn reset_presence(&self) -> Result<usize>;

    // -- Chats --

    fn get_chat(&self, id: Uuid) -> Result<Option<Chat>>;

    /// Return the chat for the unordered pair, creating it on miss.
    fn find_or_create_chat(&self, a: Uuid, b: Uuid) -> Result<Chat>;

    /// Chats containing `user_id`, most recently updated first.
    fn list_chats(&self, user_id: Uuid) -> Result<Vec<Chat>>;

    /// Overwrite the snapshot and bump `updated_at` to the snapshot's time.
    fn update_last_message(&self, chat_id: Uuid, snapshot: &LastMessage) -> Result<()>;

    // -- Messages --

    fn insert_message(&self, message: &Message) -> Result<()>;

    fn latest_message_at(&self, chat_id: Uuid) -> Result<Option<DateTime<Utc>>>;

    /// The newest `limit` messages strictly before `before` (or overall),
    /// returned in ascending creation order.
    fn list_messages(
        &self,
        chat_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>>;

    /// The oldest `limit` messages strictly after `after`, ascending.
    fn list_messages_after(
        &self,
        chat_id: Uuid,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Message>>;

    /// Flip every unseen message not sent by `reader`. Returns rows changed.
    fn mark_seen(&self, chat_id: Uuid, reader: Uuid, at: DateTime<Utc>) -> Result<usize>;

    fn unread_count(&self, chat_id: Uuid, user_id: Uuid) -> Result<u32>;
}
