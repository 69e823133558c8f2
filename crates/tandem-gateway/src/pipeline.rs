use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use tandem_types::error::ChatError;
use tandem_types::events::ServerEvent;
use tandem_types::models::{Chat, MAX_CONTENT_CHARS, Message};

use crate::dispatcher::Dispatcher;
use crate::store::StoreCall;

/// Trim and bound message content.
pub fn normalize_content(raw: &str) -> Result<String, ChatError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(ChatError::invalid("message content is required"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::invalid(format!(
            "message cannot exceed {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(content.to_string())
}

/// Per-chat timestamp source, guarded by the chat's ordering lock.
#[derive(Debug, Default)]
pub struct ChatSequence {
    last: Option<DateTime<Utc>>,
    loaded: bool,
}

impl ChatSequence {
    /// Next authoritative creation time: microsecond precision and strictly
    /// after the previous one, even if the wall clock stalls or steps back.
    pub fn next(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now);
        let at = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(at);
        at
    }

    fn seed(&mut self, latest: Option<DateTime<Utc>>) {
        self.last = self.last.max(latest);
        self.loaded = true;
    }
}

impl Dispatcher {
    /// Validate, persist, then fan out a message.
    ///
    /// Creation is serialized per chat: the timestamp, the insert, and the
    /// fan-out all happen under the chat's ordering lock, so every observer
    /// sees a chat's messages in creation order. A message that fails to
    /// persist is never broadcast. The last-message snapshot is best-effort.
    ///
    /// If the insert outlives the store timeout the caller gets
    /// `StoreUnavailable`, but the lock stays held until the write settles.
    /// A write that commits late is then published like any other, so
    /// observers never miss it and never see a later message first.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        chat_id: Uuid,
        raw: &str,
    ) -> Result<Message, ChatError> {
        let content = normalize_content(raw)?;
        let chat = self.authorize(chat_id, sender_id).await?;

        let mut sequence = self.lock_chat(chat_id).await?;
        if !sequence.loaded {
            let latest = self
                .store()
                .call("latest_message_at", move |s| s.latest_message_at(chat_id))
                .await?;
            sequence.seed(latest);
        }

        let message = Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            content,
            seen: false,
            seen_at: None,
            created_at: sequence.next(Utc::now()),
        };

        let record = message.clone();
        let insert = self
            .store()
            .call_or_pending("insert_message", move |s| s.insert_message(&record))
            .await;

        match insert {
            StoreCall::Done(result) => result?,
            StoreCall::Pending(pending) => {
                let dispatcher = self.clone();
                let late = message.clone();
                tokio::spawn(async move {
                    match pending.finish().await {
                        Ok(()) => {
                            warn!(
                                "Message {} in chat {} committed after its sender gave up",
                                late.id, late.chat_id
                            );
                            dispatcher.publish(&chat, &late).await;
                        }
                        Err(e) => warn!("Late insert of message {} dropped: {}", late.id, e),
                    }
                    drop(sequence);
                });
                return Err(ChatError::unavailable("insert_message timed out"));
            }
        }

        self.publish(&chat, &message).await;
        drop(sequence);
        Ok(message)
    }

    /// Refresh the chat snapshot and fan a persisted message out to the room
    /// and to both participants. Caller holds the chat's ordering lock.
    async fn publish(&self, chat: &Chat, message: &Message) {
        let chat_id = chat.id;
        let snapshot = message.snapshot();
        let cached = snapshot.clone();
        if let Err(e) = self
            .store()
            .call("update_last_message", move |s| s.update_last_message(chat_id, &cached))
            .await
        {
            warn!("Chat {} snapshot not updated, message {} still delivered: {}", chat_id, message.id, e);
        }

        let delivered = self
            .rooms()
            .broadcast(chat_id, &ServerEvent::MessageReceived {
                message: message.clone(),
            })
            .await;

        let notified = self
            .sessions()
            .send_to_users(&chat.participants, &ServerEvent::ChatSummaryChanged {
                chat_id,
                last_message: snapshot,
            })
            .await;

        debug!(
            "Message {} in chat {}: {} room deliveries, {} summary notices",
            message.id, chat_id, delivered, notified
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_trimmed_and_bounded() {
        assert_eq!(normalize_content("  hi \n").unwrap(), "hi");
        assert!(matches!(normalize_content(""), Err(ChatError::InvalidContent(_))));
        assert!(matches!(normalize_content(" \t\n "), Err(ChatError::InvalidContent(_))));

        let max = "a".repeat(MAX_CONTENT_CHARS);
        assert_eq!(normalize_content(&max).unwrap().len(), MAX_CONTENT_CHARS);
        let over = "a".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(normalize_content(&over), Err(ChatError::InvalidContent(_))));

        // Length is counted in characters, not bytes.
        let wide = "é".repeat(MAX_CONTENT_CHARS);
        assert!(normalize_content(&wide).is_ok());
        // Surrounding whitespace does not count toward the limit.
        assert!(normalize_content(&format!("  {max}  ")).is_ok());
    }

    #[test]
    fn sequence_is_strictly_increasing() {
        let mut seq = ChatSequence::default();
        let t0 = DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();

        let a = seq.next(t0);
        let b = seq.next(t0);
        let c = seq.next(t0 - Duration::seconds(5));
        let d = seq.next(t0 + Duration::seconds(1));

        assert_eq!(a, t0);
        assert_eq!(b, t0 + Duration::microseconds(1));
        assert_eq!(c, t0 + Duration::microseconds(2));
        assert_eq!(d, t0 + Duration::seconds(1));
    }

    #[test]
    fn seeding_never_moves_backwards() {
        let mut seq = ChatSequence::default();
        let t0 = DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();

        seq.seed(Some(t0));
        assert_eq!(seq.next(t0 - Duration::seconds(1)), t0 + Duration::microseconds(1));

        seq.seed(None);
        assert!(seq.next(t0) > t0 + Duration::microseconds(1));
    }
}
