use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_types::error::ChatError;
use tandem_types::events::ServerEvent;
use tandem_types::models::Chat;

use crate::locks::KeyedLocks;
use crate::pipeline::ChatSequence;
use crate::registry::SessionRegistry;
use crate::rooms::RoomMembership;
use crate::session::SessionHandle;
use crate::store::StoreHandle;

/// How many missed messages a join replays before telling the client to
/// page the rest through the pull path.
pub const REPLAY_LIMIT: u32 = 200;

/// Shared hub for every connection and REST handler: owns the session
/// registry, room membership, and the per-chat ordering locks.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: StoreHandle,
    sessions: SessionRegistry,
    rooms: RoomMembership,
    /// Serializes persist-then-fan-out per chat.
    chat_locks: KeyedLocks<ChatSequence>,
    /// Serializes online/offline transitions per user.
    presence_locks: KeyedLocks<()>,
}

impl Dispatcher {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                sessions: SessionRegistry::new(),
                rooms: RoomMembership::new(),
                chat_locks: KeyedLocks::new(),
                presence_locks: KeyedLocks::new(),
            }),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn rooms(&self) -> &RoomMembership {
        &self.inner.rooms
    }

    pub(crate) fn chat_locks(&self) -> &KeyedLocks<ChatSequence> {
        &self.inner.chat_locks
    }

    pub(crate) fn presence_locks(&self) -> &KeyedLocks<()> {
        &self.inner.presence_locks
    }

    /// Load a chat and check that `user_id` is one of its two participants.
    pub async fn authorize(&self, chat_id: Uuid, user_id: Uuid) -> Result<Chat, ChatError> {
        let chat = self
            .store()
            .call("get_chat", move |s| s.get_chat(chat_id))
            .await?
            .ok_or_else(|| ChatError::not_found("chat not found"))?;

        if !chat.has_participant(user_id) {
            return Err(ChatError::unauthorized("not a participant of this chat"));
        }
        Ok(chat)
    }

    /// Take the chat's ordering lock. Waiting is bounded by the store timeout,
    /// since the holder may itself be waiting on a stalled store write.
    pub(crate) async fn lock_chat(
        &self,
        chat_id: Uuid,
    ) -> Result<OwnedMutexGuard<ChatSequence>, ChatError> {
        tokio::time::timeout(self.store().timeout(), self.chat_locks().lock(chat_id))
            .await
            .map_err(|_| {
                warn!("Chat {} ordering lock not acquired in time", chat_id);
                ChatError::unavailable("chat is busy, try again")
            })
    }

    /// Add a session to a chat's room.
    ///
    /// Membership is added under the chat's ordering lock, and the
    /// `RoomJoined` acknowledgement (with anything persisted after `since`)
    /// is queued before the lock is released, so every later message reaches
    /// this session live and nothing in between is lost.
    ///
    /// Joining also reconciles seen state for the joining user and tells the
    /// other room members. Returns how many messages were newly marked seen.
    pub async fn join(
        &self,
        session: &SessionHandle,
        chat_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<usize, ChatError> {
        let user_id = session.user_id();
        self.authorize(chat_id, user_id).await?;

        {
            let _order = self.lock_chat(chat_id).await?;

            let (missed, has_more) = match since {
                Some(since) => {
                    let mut missed = self
                        .store()
                        .call("list_messages_after", move |s| {
                            s.list_messages_after(chat_id, since, REPLAY_LIMIT + 1)
                        })
                        .await?;
                    let has_more = missed.len() > REPLAY_LIMIT as usize;
                    missed.truncate(REPLAY_LIMIT as usize);
                    (missed, has_more)
                }
                None => (Vec::new(), false),
            };

            self.rooms().add(chat_id, session).await;
            session.deliver(ServerEvent::RoomJoined {
                chat_id,
                missed,
                has_more,
            });
        }

        info!("User {} (session {}) joined chat {}", user_id, session.id(), chat_id);

        match self.reconcile_seen(chat_id, user_id, Some(session.id())).await {
            Ok(marked) => Ok(marked),
            Err(e) => {
                warn!("Seen reconciliation on join of chat {} failed: {}", chat_id, e);
                Ok(0)
            }
        }
    }

    /// Remove a session from a chat's room. Always allowed.
    pub async fn leave(&self, session: &SessionHandle, chat_id: Uuid) -> bool {
        let removed = self.rooms().remove(chat_id, session.id()).await;
        if removed {
            info!("User {} (session {}) left chat {}", session.user_id(), session.id(), chat_id);
        }
        removed
    }
}
