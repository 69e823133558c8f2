use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use tandem_types::events::ServerEvent;

use crate::session::SessionHandle;

/// Live sessions grouped by user. Source of truth for presence: a user is
/// online iff at least one of their sessions is registered here.
#[derive(Default)]
pub struct SessionRegistry {
    /// user_id -> (session_id -> handle)
    sessions: RwLock<HashMap<Uuid, HashMap<Uuid, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns true if it is the user's first live session.
    pub async fn register(&self, session: SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        let owned = sessions.entry(session.user_id()).or_default();
        let first = owned.is_empty();
        owned.insert(session.id(), session);
        first
    }

    /// Remove a session. Returns true if it was the user's last one.
    /// Unknown sessions are ignored.
    pub async fn unregister(&self, session: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(owned) = sessions.get_mut(&session.user_id()) else {
            return false;
        };
        if owned.remove(&session.id()).is_none() {
            return false;
        }
        if owned.is_empty() {
            sessions.remove(&session.user_id());
            return true;
        }
        false
    }

    pub async fn sessions_for(&self, user_id: Uuid) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(&user_id)
            .map(|owned| owned.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&user_id)
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.values().map(HashMap::len).sum()
    }

    /// Deliver to every live session system-wide. Returns how many accepted.
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .flat_map(HashMap::values)
            .filter(|s| s.deliver(event.clone()))
            .count()
    }

    /// Deliver to every live session of the given users.
    pub async fn send_to_users(&self, user_ids: &[Uuid], event: &ServerEvent) -> usize {
        let sessions = self.sessions.read().await;
        user_ids
            .iter()
            .filter_map(|id| sessions.get(id))
            .flat_map(HashMap::values)
            .filter(|s| s.deliver(event.clone()))
            .count()
    }
}
