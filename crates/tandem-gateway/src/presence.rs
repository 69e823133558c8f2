use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_types::error::ChatError;
use tandem_types::events::ServerEvent;

use crate::dispatcher::Dispatcher;
use crate::session::SessionHandle;

impl Dispatcher {
    /// Create and register a session for `user_id`. `Ready`, carrying the
    /// users online just before this one, is queued ahead of registration so
    /// it is always the session's first event.
    pub async fn open_session(
        &self,
        user_id: Uuid,
    ) -> (SessionHandle, UnboundedReceiver<ServerEvent>) {
        let (session, events) = SessionHandle::new(user_id);
        let online_users = self.sessions().online_users().await;
        session.deliver(ServerEvent::Ready {
            user_id,
            session_id: session.id(),
            online_users,
        });
        self.connect(&session).await;
        (session, events)
    }

    /// Register a live session. The user's first session flips them online
    /// and announces it to every live session. Returns true on that
    /// transition.
    pub async fn connect(&self, session: &SessionHandle) -> bool {
        let user_id = session.user_id();
        let _presence = self.presence_locks().lock(user_id).await;

        if !self.sessions().register(session.clone()).await {
            return false;
        }

        let now = Utc::now();
        if let Err(e) = self
            .store()
            .call("set_presence", move |s| s.set_presence(user_id, true, now))
            .await
        {
            warn!("Could not persist online state for {}: {}", user_id, e);
        }

        self.sessions()
            .broadcast(&ServerEvent::UserOnline { user_id })
            .await;
        info!("User {} is online", user_id);
        true
    }

    /// Tear a session down: leave every room it joined, then unregister it.
    /// If it was the user's last session, stamp last-seen and announce the
    /// user offline. Safe to call more than once.
    pub async fn disconnect(&self, session: &SessionHandle) -> Option<DateTime<Utc>> {
        let user_id = session.user_id();
        let left = self.rooms().remove_session(session.id()).await;
        if !left.is_empty() {
            info!("Session {} removed from {} rooms", session.id(), left.len());
        }

        let _presence = self.presence_locks().lock(user_id).await;
        if !self.sessions().unregister(session).await {
            return None;
        }

        let last_seen = Utc::now();
        if let Err(e) = self
            .store()
            .call("set_presence", move |s| s.set_presence(user_id, false, last_seen))
            .await
        {
            warn!("Could not persist offline state for {}: {}", user_id, e);
        }

        self.sessions()
            .broadcast(&ServerEvent::UserOffline { user_id, last_seen })
            .await;
        info!("User {} is offline", user_id);
        Some(last_seen)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.sessions().is_online(user_id).await
    }

    /// Relay typing state to the other participant's sessions in the room.
    /// Nothing is stored and nothing expires server-side: clearing the
    /// indicator is up to the sender's follow-up and the receiving client.
    pub async fn set_typing(
        &self,
        session: &SessionHandle,
        chat_id: Uuid,
        is_typing: bool,
    ) -> Result<usize, ChatError> {
        if !self.rooms().is_member(chat_id, session.id()).await {
            return Err(ChatError::unauthorized("join the chat before sending typing state"));
        }

        let user_id = session.user_id();
        let event = ServerEvent::UserTyping {
            chat_id,
            user_id,
            is_typing,
        };
        Ok(self
            .rooms()
            .broadcast_where(chat_id, &event, |s| s.user_id() != user_id)
            .await)
    }
}
