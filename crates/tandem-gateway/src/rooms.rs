use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

use tandem_types::events::ServerEvent;

use crate::session::SessionHandle;

#[derive(Default)]
struct Rooms {
    /// chat_id -> (session_id -> handle)
    members: HashMap<Uuid, HashMap<Uuid, SessionHandle>>,
    /// session_id -> chats joined, for teardown without a client leave
    joined: HashMap<Uuid, HashSet<Uuid>>,
}

/// Which live sessions currently receive a chat's events. Authorization is
/// the caller's job; this only keeps the two indexes consistent.
#[derive(Default)]
pub struct RoomMembership {
    rooms: RwLock<Rooms>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the session was already a member.
    pub async fn add(&self, chat_id: Uuid, session: &SessionHandle) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms
            .joined
            .entry(session.id())
            .or_default()
            .insert(chat_id);
        rooms
            .members
            .entry(chat_id)
            .or_default()
            .insert(session.id(), session.clone())
            .is_none()
    }

    pub async fn remove(&self, chat_id: Uuid, session_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Rooms { members, joined } = &mut *rooms;

        let removed = match members.get_mut(&chat_id) {
            Some(room) => {
                let removed = room.remove(&session_id).is_some();
                if room.is_empty() {
                    members.remove(&chat_id);
                }
                removed
            }
            None => false,
        };

        if let Some(chats) = joined.get_mut(&session_id) {
            chats.remove(&chat_id);
            if chats.is_empty() {
                joined.remove(&session_id);
            }
        }
        removed
    }

    /// Drop a session from every room. Returns the chats it was in.
    pub async fn remove_session(&self, session_id: Uuid) -> Vec<Uuid> {
        let mut rooms = self.rooms.write().await;
        let Rooms { members, joined } = &mut *rooms;

        let chats: Vec<Uuid> = joined
            .remove(&session_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for chat_id in &chats {
            if let Some(room) = members.get_mut(chat_id) {
                room.remove(&session_id);
                if room.is_empty() {
                    members.remove(chat_id);
                }
            }
        }
        chats
    }

    pub async fn is_member(&self, chat_id: Uuid, session_id: Uuid) -> bool {
        self.rooms
            .read()
            .await
            .members
            .get(&chat_id)
            .is_some_and(|room| room.contains_key(&session_id))
    }

    pub async fn members(&self, chat_id: Uuid) -> Vec<SessionHandle> {
        self.rooms
            .read()
            .await
            .members
            .get(&chat_id)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn rooms_of(&self, session_id: Uuid) -> Vec<Uuid> {
        self.rooms
            .read()
            .await
            .joined
            .get(&session_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Fan out to every member of the room.
    pub async fn broadcast(&self, chat_id: Uuid, event: &ServerEvent) -> usize {
        self.broadcast_where(chat_id, event, |_| true).await
    }

    /// Fan out to the members accepted by `filter`. Returns how many accepted
    /// the event.
    pub async fn broadcast_where<F>(&self, chat_id: Uuid, event: &ServerEvent, filter: F) -> usize
    where
        F: Fn(&SessionHandle) -> bool,
    {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.members.get(&chat_id) else {
            return 0;
        };
        room.values()
            .filter(|s| filter(*s))
            .filter(|s| s.deliver(event.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_remove_keep_indexes_in_step() {
        let rooms = RoomMembership::new();
        let chat = Uuid::new_v4();
        let (session, _rx) = SessionHandle::new(Uuid::new_v4());

        assert!(rooms.add(chat, &session).await);
        assert!(!rooms.add(chat, &session).await);
        assert!(rooms.is_member(chat, session.id()).await);
        assert_eq!(rooms.rooms_of(session.id()).await, vec![chat]);

        assert!(rooms.remove(chat, session.id()).await);
        assert!(!rooms.remove(chat, session.id()).await);
        assert!(!rooms.is_member(chat, session.id()).await);
        assert!(rooms.rooms_of(session.id()).await.is_empty());
    }

    #[tokio::test]
    async fn remove_session_leaves_every_room() {
        let rooms = RoomMembership::new();
        let (session, _rx) = SessionHandle::new(Uuid::new_v4());
        let (other, _rx2) = SessionHandle::new(Uuid::new_v4());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        rooms.add(first, &session).await;
        rooms.add(second, &session).await;
        rooms.add(first, &other).await;

        let mut left = rooms.remove_session(session.id()).await;
        left.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(left, expected);

        assert!(rooms.members(second).await.is_empty());
        let remaining: Vec<Uuid> = rooms.members(first).await.iter().map(SessionHandle::id).collect();
        assert_eq!(remaining, vec![other.id()]);
    }

    #[tokio::test]
    async fn broadcast_where_filters_members() {
        let rooms = RoomMembership::new();
        let chat = Uuid::new_v4();
        let (a, mut a_rx) = SessionHandle::new(Uuid::new_v4());
        let (b, mut b_rx) = SessionHandle::new(Uuid::new_v4());
        rooms.add(chat, &a).await;
        rooms.add(chat, &b).await;

        let event = ServerEvent::UserTyping {
            chat_id: chat,
            user_id: a.user_id(),
            is_typing: true,
        };
        let a_user = a.user_id();
        assert_eq!(rooms.broadcast_where(chat, &event, |s| s.user_id() != a_user).await, 1);
        assert_eq!(b_rx.try_recv().ok(), Some(event));
        assert!(a_rx.try_recv().is_err());

        assert_eq!(rooms.broadcast(Uuid::new_v4(), &ServerEvent::UserOnline { user_id: a_user }).await, 0);
    }
}
