#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use tandem_db::{ChatStore, Database};
use tandem_gateway::{Dispatcher, SessionHandle, StoreHandle};
use tandem_types::events::ServerEvent;
use tandem_types::models::{Chat, LastMessage, Message, User};

/// In-memory database with switches for injecting failures and stalls.
pub struct FlakyStore {
    inner: Database,
    pub fail_snapshot: AtomicBool,
    pub fail_insert: AtomicBool,
    /// Milliseconds `insert_message` sleeps before writing.
    pub insert_stall_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: Database::open_in_memory().expect("in-memory db"),
            fail_snapshot: AtomicBool::new(false),
            fail_insert: AtomicBool::new(false),
            insert_stall_ms: AtomicU64::new(0),
        }
    }
}

impl ChatStore for FlakyStore {
    fn create_user(&self, email: &str, display_name: Option<&str>, verified: bool) -> Result<User> {
        self.inner.create_user(email, display_name, verified)
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.inner.get_user(id)
    }

    fn list_users(&self, exclude: Uuid, search: Option<&str>, limit: u32) -> Result<Vec<User>> {
        self.inner.list_users(exclude, search, limit)
    }

    fn update_profile(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Option<User>> {
        self.inner.update_profile(id, display_name, avatar)
    }

    fn set_presence(&self, id: Uuid, online: bool, last_seen: DateTime<Utc>) -> Result<()> {
        self.inner.set_presence(id, online, last_seen)
    }

    fn reset_presence(&self) -> Result<usize> {
        self.inner.reset_presence()
    }

    fn get_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        self.inner.get_chat(id)
    }

    fn find_or_create_chat(&self, a: Uuid, b: Uuid) -> Result<Chat> {
        self.inner.find_or_create_chat(a, b)
    }

    fn list_chats(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        self.inner.list_chats(user_id)
    }

    fn update_last_message(&self, chat_id: Uuid, snapshot: &LastMessage) -> Result<()> {
        if self.fail_snapshot.load(Ordering::SeqCst) {
            bail!("injected snapshot failure");
        }
        self.inner.update_last_message(chat_id, snapshot)
    }

    fn insert_message(&self, message: &Message) -> Result<()> {
        let stall = self.insert_stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            std::thread::sleep(Duration::from_millis(stall));
        }
        if self.fail_insert.load(Ordering::SeqCst) {
            bail!("injected insert failure");
        }
        self.inner.insert_message(message)
    }

    fn latest_message_at(&self, chat_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        self.inner.latest_message_at(chat_id)
    }

    fn list_messages(
        &self,
        chat_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.inner.list_messages(chat_id, before, limit)
    }

    fn list_messages_after(
        &self,
        chat_id: Uuid,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.inner.list_messages_after(chat_id, after, limit)
    }

    fn mark_seen(&self, chat_id: Uuid, reader: Uuid, at: DateTime<Utc>) -> Result<usize> {
        self.inner.mark_seen(chat_id, reader, at)
    }

    fn unread_count(&self, chat_id: Uuid, user_id: Uuid) -> Result<u32> {
        self.inner.unread_count(chat_id, user_id)
    }
}

pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let store = Arc::new(FlakyStore::new());
        let dispatcher = Dispatcher::new(StoreHandle::new(store.clone(), timeout));
        Self { store, dispatcher }
    }

    pub fn user(&self, email: &str) -> User {
        self.store.create_user(email, None, true).expect("create user")
    }

    /// Open and register a live session for `user`.
    pub async fn connect(&self, user: &User) -> (SessionHandle, UnboundedReceiver<ServerEvent>) {
        let (session, rx) = SessionHandle::new(user.id);
        self.dispatcher.connect(&session).await;
        (session, rx)
    }

    pub async fn chat(&self, a: &User, b: &User) -> Chat {
        self.dispatcher.open_chat(a.id, b.id).await.expect("open chat")
    }

    pub async fn history(&self, chat: &Chat, caller: &User) -> Vec<Message> {
        self.dispatcher
            .list_messages(chat.id, caller.id, None, Some(200))
            .await
            .expect("history")
            .messages
    }
}

/// Everything queued on a session so far.
pub fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn received(events: &[ServerEvent]) -> Vec<Message> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::MessageReceived { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

pub fn summaries(events: &[ServerEvent]) -> Vec<LastMessage> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::ChatSummaryChanged { last_message, .. } => Some(last_message.clone()),
            _ => None,
        })
        .collect()
}
