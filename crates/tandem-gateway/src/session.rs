use tokio::sync::mpsc;
use uuid::Uuid;

use tandem_types::events::ServerEvent;

/// One live, authenticated connection. Cloning shares the same outbound
/// queue; the connection's send task drains it in order.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl SessionHandle {
    pub fn new(user_id: Uuid) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Queue an event. Returns false if the connection is already gone, in
    /// which case the event is dropped.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}
