use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use tandem_db::ChatStore;
use tandem_types::api::MessagePage;
use tandem_types::error::ChatError;
use tandem_types::events::ServerEvent;
use tandem_types::models::{Chat, ChatSummary};

use crate::dispatcher::Dispatcher;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

/// Page size for history queries: default when absent, clamped to
/// `1..=MAX_PAGE_SIZE`.
pub fn page_size(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

fn summarize(store: &dyn ChatStore, chat: Chat, viewer: Uuid) -> anyhow::Result<ChatSummary> {
    let participant = match chat.other_participant(viewer) {
        Some(other) => store.get_user(other)?,
        None => None,
    };
    let unread_count = store.unread_count(chat.id, viewer)?;

    Ok(ChatSummary {
        id: chat.id,
        participant,
        last_message: chat.last_message,
        unread_count,
        created_at: chat.created_at,
        updated_at: chat.updated_at,
    })
}

impl Dispatcher {
    /// Mark everything the other participant sent in `chat_id` as seen by
    /// `reader`, after checking `reader` belongs to the chat.
    ///
    /// `origin` is the session that asked, if any; it is skipped when the
    /// `MessagesSeen` notice goes out to the room.
    pub async fn mark_seen(
        &self,
        chat_id: Uuid,
        reader: Uuid,
        origin: Option<Uuid>,
    ) -> Result<usize, ChatError> {
        self.authorize(chat_id, reader).await?;
        self.reconcile_seen(chat_id, reader, origin).await
    }

    /// Unchecked half of `mark_seen`. Idempotent: with nothing unseen it
    /// writes nothing and returns zero.
    pub(crate) async fn reconcile_seen(
        &self,
        chat_id: Uuid,
        reader: Uuid,
        origin: Option<Uuid>,
    ) -> Result<usize, ChatError> {
        let now = Utc::now();
        let marked = self
            .store()
            .call("mark_seen", move |s| s.mark_seen(chat_id, reader, now))
            .await?;

        let notified = self
            .rooms()
            .broadcast_where(
                chat_id,
                &ServerEvent::MessagesSeen {
                    chat_id,
                    user_id: reader,
                },
                |s| Some(s.id()) != origin,
            )
            .await;

        debug!(
            "User {} saw {} messages in chat {} ({} sessions told)",
            reader, marked, chat_id, notified
        );
        Ok(marked)
    }

    /// One page of history in ascending creation order, strictly before
    /// `before` when given. `has_more` is set when the page came back full;
    /// the next page uses the first message's `created_at` as `before`.
    pub async fn list_messages(
        &self,
        chat_id: Uuid,
        caller: Uuid,
        before: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ChatError> {
        self.authorize(chat_id, caller).await?;

        let limit = page_size(limit);
        let messages = self
            .store()
            .call("list_messages", move |s| s.list_messages(chat_id, before, limit))
            .await?;

        Ok(MessagePage {
            has_more: messages.len() == limit as usize,
            messages,
        })
    }

    /// Find or create the chat between `caller` and `other`.
    pub async fn open_chat(&self, caller: Uuid, other: Uuid) -> Result<Chat, ChatError> {
        if caller == other {
            return Err(ChatError::invalid("cannot open a chat with yourself"));
        }

        self.store()
            .call("open_chat", move |s| {
                if s.get_user(other)?.is_none() {
                    return Ok(None);
                }
                s.find_or_create_chat(caller, other).map(Some)
            })
            .await?
            .ok_or_else(|| ChatError::not_found("user not found"))
    }

    pub async fn chat_summary(&self, chat_id: Uuid, caller: Uuid) -> Result<ChatSummary, ChatError> {
        let chat = self.authorize(chat_id, caller).await?;
        self.store()
            .call("chat_summary", move |s| summarize(s, chat, caller))
            .await
    }

    /// Every chat `caller` is part of, most recently active first.
    pub async fn list_chats(&self, caller: Uuid) -> Result<Vec<ChatSummary>, ChatError> {
        self.store()
            .call("list_chats", move |s| {
                s.list_chats(caller)?
                    .into_iter()
                    .map(|chat| summarize(s, chat, caller))
                    .collect()
            })
            .await
    }
}
